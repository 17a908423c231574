use ndarray::prelude::*;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use indicatif::{ProgressBar, ProgressStyle};
use clap::Parser;
use anyhow::{anyhow, Context};
use flowunwrap::{
    unwrap_with, ConnCompParams, CostMode, InitMethod, Interferogram, Interrupt, Params,
    SolveObserver, SolveOptions, TileParams
};
use flowunwrap::util::{Region, TileCount};



#[derive(Parser)]
struct Args {
    /// Numpy array file (.npy) containing a 2D array of wrapped phases
    wrapped: PathBuf,

    #[arg(short, long, value_name = "FILE")]
    /// Pixel magnitudes or quality, zero marks a masked pixel
    magnitude: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    /// Byte mask, zero marks a masked pixel
    mask: Option<PathBuf>,

    #[arg(short, long, value_name = "FILE")]
    /// Coarse unwrapped phase to solve relative to
    estimate: Option<PathBuf>,

    #[arg(long, value_enum, value_name = "MODE", default_value_t = CostMode::Smooth)]
    /// Cost model scoring the flows
    cost_mode: CostMode,

    #[arg(short, long, default_value_t = -1., allow_negative_numbers = true)]
    /// Lp exponent, negative uses the statistical cost of the cost mode
    p: f64,

    #[arg(long)]
    /// Use separate weights for positive and negative flows with Lp costs
    bidir: bool,

    #[arg(long, value_enum, value_name = "METHOD", default_value_t = InitMethod::Mst)]
    /// Method producing the initial feasible flow
    init: InitMethod,

    #[arg(long, default_value_t = 4)]
    /// Largest flow increment tried by the optimizer
    max_flow: i64,

    #[arg(long)]
    /// Stop after the initial flow, skipping optimization
    init_only: bool,

    #[arg(short, long, value_name = "RxC")]
    /// Split the input into R rows and C columns of tiles
    tiles: Option<TileCount>,

    #[arg(long, default_value_t = 0)]
    /// Rows shared by vertically neighbouring tiles
    row_overlap: usize,

    #[arg(long, default_value_t = 0)]
    /// Columns shared by horizontally neighbouring tiles
    col_overlap: usize,

    #[arg(long, default_value_t = 1)]
    /// Number of tiles solved at once
    threads: usize,

    #[arg(long)]
    /// Re-solve the assembled tiles as a single tile
    reopt: bool,

    #[arg(long, value_name = "WxH+X+Y")]
    /// Only unwrap this window of the inputs
    crop: Option<Region>,

    #[arg(short, long, value_name = "FILE")]
    /// Output the unwrapped phase
    unwrapped: Option<PathBuf>,

    #[arg(short, long, value_name = "FILE")]
    /// Output connected component labels
    conncomp: Option<PathBuf>,

    #[arg(long, default_value_t = 0.01)]
    /// Smallest connected component, as a fraction of all pixels
    min_comp_frac: f64,

    #[arg(long, value_name = "FILE")]
    /// Output a greyscale PNG preview of the unwrapped phase
    preview: Option<PathBuf>
}



fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.unwrapped.is_none() && args.conncomp.is_none() && args.preview.is_none() {
        eprintln!("No output files specified. Exiting.");
        return Ok(());
    }

    let crop = |arr: Array2<f32>, name: &str| -> anyhow::Result<Array2<f32>> {
        match args.crop {
            Some(r) => r.slice(arr.view())
                .map(|v| v.to_owned())
                .ok_or_else(|| anyhow!("Crop window does not fit the {} array of shape {:?}", name, arr.dim())),
            None => Ok(arr)
        }
    };

    let wrapped = crop(read_phase(&args.wrapped)?, "wrapped")?;

    println!("Loaded wrapped phase array of shape {:?}", wrapped.dim());

    let magnitude = args.magnitude.as_deref().map(read_phase).transpose()?
        .map(|m| crop(m, "magnitude")).transpose()?;
    let estimate = args.estimate.as_deref().map(read_phase).transpose()?
        .map(|e| crop(e, "estimate")).transpose()?;
    let mask = args.mask.as_deref().map(read_mask).transpose()?
        .map(|m| match args.crop {
            Some(r) => r.slice(m.view())
                .map(|v| v.to_owned())
                .ok_or_else(|| anyhow!("Crop window does not fit the mask of shape {:?}", m.dim())),
            None => Ok(m)
        }).transpose()?;

    let tiles = args.tiles.unwrap_or(TileCount { rows: 1, cols: 1 });

    let params = Params {
        cost_mode: args.cost_mode,
        p: args.p,
        bidir: args.bidir,
        init_method: args.init,
        max_flow: args.max_flow,
        init_only: args.init_only,
        tile: TileParams {
            ntilerow: tiles.rows,
            ntilecol: tiles.cols,
            row_overlap: args.row_overlap,
            col_overlap: args.col_overlap,
            nthreads: args.threads,
            single_tile_reopt: args.reopt
        },
        conncomp: ConnCompParams {
            enabled: args.conncomp.is_some(),
            min_size_frac: args.min_comp_frac,
            ..ConnCompParams::default()
        },
        ..Params::default()
    };

    let mut input = Interferogram::new(wrapped.view());

    if let Some(m) = magnitude.as_ref() { input = input.with_magnitude(m.view()); }
    if let Some(m) = mask.as_ref() { input = input.with_mask(m.view()); }
    if let Some(e) = estimate.as_ref() { input = input.with_estimate(e.view()); }

    let interrupt = Interrupt::new();
    let handler_interrupt = interrupt.clone();
    let signals = AtomicUsize::new(0);

    ctrlc::set_handler(move || on_signal(&handler_interrupt, &signals))
        .context("Could not install the interrupt handler")?;

    let mut dump = PhaseDump { path: args.unwrapped.clone() };

    let (tx, rx) = flume::unbounded();
    let bar = progress_bar(tiles.rows*tiles.cols)?;
    let bar_clone = bar.clone();

    bar.set_message("Unwrapping");

    let handle = thread::spawn(move || {
        for idx in rx.iter() {
            bar_clone.set_position(idx as u64);
        }
    });

    let opts = SolveOptions { interrupt: Some(&interrupt), observer: Some(&mut dump), monitor: Some(tx) };
    let result = unwrap_with(&input, &params, opts);

    handle.join().map_err(|_| anyhow!("Progress monitor thread panicked"))?;
    bar.finish();

    let out = result?;

    println!(
        "Total cost {:.0}, maximum flow {}, {} clipped arc costs",
        out.total_cost, out.max_flow, out.clipped_costs
    );

    if let Some(path) = args.unwrapped.as_ref() {
        write_phase(out.phase.view(), path)?;
    }

    if let (Some(path), Some(comp)) = (args.conncomp.as_ref(), out.conncomp.as_ref()) {
        comp.write_npy(File::create(path).with_context(|| format!("Could not create {}", path.display()))?)?;
    }

    if let Some(path) = args.preview.as_ref() {
        write_preview(out.phase.view(), path)?;
    }

    Ok(())
}



/// First signal dumps the current solution, any later one stops the solve.
fn on_signal(interrupt: &Interrupt, count: &AtomicUsize) {
    if count.fetch_add(1, Ordering::SeqCst) == 0 {
        eprintln!("Interrupt received, dumping the current solution. Interrupt again to stop.");
        interrupt.request_dump();
    } else {
        eprintln!("Interrupt received, stopping.");
        interrupt.request_stop();
    }
}

/// Writes the solver's current phase to the unwrapped output whenever it is dumped.
struct PhaseDump {
    path: Option<PathBuf>
}

impl SolveObserver for PhaseDump {
    fn interrupted(&mut self, phase: ArrayView2<f32>) {
        let Some(path) = self.path.as_ref() else {
            log::warn!("No unwrapped output file given, dropping the dumped solution");
            return;
        };

        match write_phase(phase, path) {
            Ok(()) => log::warn!("Dumped current solution to {}", path.display()),
            Err(e) => log::error!("{:#}", e)
        }
    }
}

/// Tile progress when tiled, otherwise a spinner since a single tile reports nothing.
fn progress_bar(ntiles: usize) -> anyhow::Result<ProgressBar> {
    if ntiles > 1 {
        let template = "{msg} ({elapsed}) [{wide_bar:.cyan/blue}] {pos}/{len} tiles ({eta})";
        let bar = ProgressBar::new(ntiles as u64);

        bar.set_style(ProgressStyle::with_template(template)?.progress_chars("#>-"));

        Ok(bar)
    } else {
        let bar = ProgressBar::new_spinner();

        bar.set_style(ProgressStyle::with_template("{spinner} {msg} ({elapsed})")?);
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(bar)
    }
}

fn write_phase(phase: ArrayView2<f32>, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("Could not create {}", path.display()))?;

    phase.write_npy(file).with_context(|| format!("Could not write {}", path.display()))
}

/// Read a 2D float array stored as either f32 or f64.
fn read_phase(path: &Path) -> anyhow::Result<Array2<f32>> {
    let open = || File::open(path).with_context(|| format!("Could not open {}", path.display()));

    if let Ok(arr) = Array2::<f32>::read_npy(open()?) {
        return Ok(arr);
    }

    let arr = Array2::<f64>::read_npy(open()?)
        .with_context(|| format!("{} does not hold a 2D float array", path.display()))?;

    Ok(arr.mapv(|v| v as f32))
}

fn read_mask(path: &Path) -> anyhow::Result<Array2<u8>> {
    let file = File::open(path).with_context(|| format!("Could not open {}", path.display()))?;

    Array2::<u8>::read_npy(file).with_context(|| format!("{} does not hold a 2D byte array", path.display()))
}

/// Greyscale PNG of `phase` scaled from its minimum to its maximum.
fn write_preview(phase: ArrayView2<f32>, path: &Path) -> anyhow::Result<()> {
    let (h, w) = phase.dim();
    let (lo, hi) = phase.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let scale = if hi > lo { 255./(hi-lo) } else { 0. };

    let img = image::GrayImage::from_fn(w as u32, h as u32, |x, y| {
        image::Luma([((phase[[y as usize, x as usize]]-lo)*scale).round() as u8])
    });

    img.save(path).with_context(|| format!("Could not write preview {}", path.display()))
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_reads_from_either_float_width() {
        let dir = tempfile::tempdir().unwrap();
        let p32 = dir.path().join("p32.npy");
        let p64 = dir.path().join("p64.npy");
        let arr = Array2::from_shape_fn((3, 4), |(r, c)| (r*4+c) as f32*0.5);

        arr.write_npy(File::create(&p32).unwrap()).unwrap();
        arr.mapv(|v| v as f64).write_npy(File::create(&p64).unwrap()).unwrap();

        assert_eq!(read_phase(&p32).unwrap(), arr);
        assert_eq!(read_phase(&p64).unwrap(), arr);
        assert!(read_phase(&dir.path().join("missing.npy")).is_err());
    }

    #[test]
    fn preview_spans_the_grey_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let phase = Array2::from_shape_fn((2, 3), |(r, c)| (r*3+c) as f32);

        write_preview(phase.view(), &path).unwrap();

        let img = image::open(&path).unwrap().to_luma8();

        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0).0, [0]);
        assert_eq!(img.get_pixel(2, 1).0, [255]);
    }

    #[test]
    fn second_signal_stops() {
        let interrupt = Interrupt::new();
        let count = AtomicUsize::new(0);

        on_signal(&interrupt, &count);

        assert!(!interrupt.stop_requested());

        on_signal(&interrupt, &count);

        assert!(interrupt.stop_requested());
    }

    #[test]
    fn dumped_phase_lands_in_the_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unwrapped.npy");
        let phase = Array2::from_shape_fn((3, 5), |(r, c)| (r as f32)-0.25*c as f32);
        let mut dump = PhaseDump { path: Some(path.clone()) };

        dump.interrupted(phase.view());

        assert_eq!(read_phase(&path).unwrap(), phase);

        PhaseDump { path: None }.interrupted(phase.view());
    }

    #[test]
    fn single_tile_progress_is_a_spinner() {
        let spinner = progress_bar(1).unwrap();
        let bar = progress_bar(6).unwrap();

        assert_eq!(spinner.length(), None);
        assert_eq!(bar.length(), Some(6));

        spinner.finish_and_clear();
        bar.finish_and_clear();
    }
}
