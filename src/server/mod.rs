mod observers;
mod svr;

pub use svr::startup;
