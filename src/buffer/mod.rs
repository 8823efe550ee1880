pub mod frame;
pub mod inbox;
pub mod queue;
pub mod worker;

pub use inbox::handle_inbox;
pub use queue::{bounded, QueueConsumer, QueueProducer};
pub use worker::{
    new_rolling_average, run_drain_worker, run_stats_emitter, shared, RollingAverage,
    SharedConsumer,
};
