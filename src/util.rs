use ndarray::prelude::*;



/// Pixel window given as `WxH+X+Y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize
}

impl Region {
    /// The window as a slice of `arr`, or `None` if it does not fit.
    pub fn slice<'a, T>(&self, arr: ArrayView2<'a, T>) -> Option<ArrayView2<'a, T>> {
        let (h, w) = arr.dim();

        if self.w == 0 || self.h == 0 || self.x+self.w > w || self.y+self.h > h {
            return None;
        }

        Some(arr.slice_move(s![self.y..self.y+self.h, self.x..self.x+self.w]))
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let i = s.find('x').ok_or("No x found separating width and height".to_string())?;
        let p1 = s[i+1..].find('+').ok_or("No +offset found".to_string())?+i+1;
        let p2 = s[p1+1..].find('+').ok_or("Only one +offset found".to_string())?+p1+1;

        Ok(Self {
            w: s[..i].parse().map_err(|_| "Invalid width".to_string())?,
            h: s[i+1..p1].parse().map_err(|_| "Invalid height".to_string())?,
            x: s[p1+1..p2].parse().map_err(|_| "Invalid x offset".to_string())?,
            y: s[p2+1..].parse().map_err(|_| "Invalid y offset".to_string())?
        })
    }
}



/// Tile counts given as `RxC`, rows first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileCount {
    pub rows: usize,
    pub cols: usize
}

impl std::str::FromStr for TileCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (r, c) = s.split_once('x').ok_or("No x found separating rows and columns".to_string())?;
        let rows: usize = r.parse().map_err(|_| "Invalid tile row count".to_string())?;
        let cols: usize = c.parse().map_err(|_| "Invalid tile column count".to_string())?;

        if rows == 0 || cols == 0 {
            return Err("Tile counts must be positive".into());
        }

        Ok(Self { rows, cols })
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses_geometry() {
        let r: Region = "40x30+5+7".parse().unwrap();

        assert_eq!(r, Region { x: 5, y: 7, w: 40, h: 30 });
        assert!("40x30+5".parse::<Region>().is_err());
        assert!("40-30+5+7".parse::<Region>().is_err());
    }

    #[test]
    fn region_slices_inside_bounds_only() {
        let arr = Array2::from_shape_fn((10, 12), |(r, c)| (r*100+c) as f32);
        let r = Region { x: 2, y: 3, w: 4, h: 5 };
        let view = r.slice(arr.view()).unwrap();

        assert_eq!(view.dim(), (5, 4));
        assert_eq!(view[[0, 0]], 302.);
        assert!(Region { x: 10, y: 0, w: 4, h: 1 }.slice(arr.view()).is_none());
    }

    #[test]
    fn tile_count_parses() {
        assert_eq!("3x2".parse::<TileCount>().unwrap(), TileCount { rows: 3, cols: 2 });
        assert!("0x2".parse::<TileCount>().is_err());
        assert!("3".parse::<TileCount>().is_err());
    }
}
