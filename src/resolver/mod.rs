pub mod duration;
pub mod macros;
pub mod time;

pub use duration::{format_exact_duration, format_prometheus_duration, parse_duration, TimeUnit};
pub use macros::MacroContext;
pub use time::{
    parse_end_time, parse_start_time, resolve_time_range, resolve_time_range_at, Bound, TimeRange,
    DEFAULT_SPAN,
};
