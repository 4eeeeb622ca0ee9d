pub mod executor;
pub mod fetcher;
pub mod ytdlp;

pub use executor::{QueueEngine, Snapshot};
pub use fetcher::Fetcher;
pub use ytdlp::YtDlpTransfer;
