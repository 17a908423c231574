use crate::mcf::McfStatus;



#[derive(Debug, thiserror::Error)]
pub enum UnwrapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input array `{name}` has shape {found:?}, expected {expected:?}")]
    Shape {
        name: &'static str,
        found: (usize, usize),
        expected: (usize, usize)
    },

    #[error("Every pixel of the input is masked")]
    AllMasked,

    #[error("Residue {value} at node ({row}, {col}) is out of range after flow clipping")]
    ResidueOverflow { row: usize, col: usize, value: i64 },

    #[error("Maximum flow {mostflow} times nshortcycle {nshortcycle} exceeds the cost range")]
    FlowOverflow { mostflow: i64, nshortcycle: i64 },

    #[error("Min-cost-flow solver finished with status {0:?}")]
    McfNotOptimal(McfStatus),

    #[error("Network with {nodes} nodes and {arcs} arcs exceeds the min-cost-flow index range")]
    McfIndexOverflow { nodes: usize, arcs: usize },

    #[error("Internal consistency check failed: {0}")]
    Firewall(String),

    #[error("Solve interrupted")]
    Interrupted,

    #[error("Tile ({row}, {col}) failed: {source}")]
    Tile {
        row: usize,
        col: usize,
        #[source]
        source: Box<UnwrapError>
    },

    #[error("Tile ({row}, {col}) terminated abnormally")]
    TilePanicked { row: usize, col: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error)
}

pub type Result<T> = std::result::Result<T, UnwrapError>;

/// Log a firewall violation and turn it into an error.
pub(crate) fn firewall(msg: impl Into<String>) -> UnwrapError {
    let msg = msg.into();

    log::error!(target: "firewall", "{}", msg);

    UnwrapError::Firewall(msg)
}
