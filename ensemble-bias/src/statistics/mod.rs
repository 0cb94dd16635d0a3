pub mod history;
pub mod sampler;

pub use history::WindowHistory;
pub use sampler::{WindowSampler, WindowTimers};
