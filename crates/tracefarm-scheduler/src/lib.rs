pub mod actor;
pub mod api;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod finalizer;
pub mod ledger;
pub mod metrics;
pub mod scene;
pub mod session;
pub mod tcp;
pub mod timeout;
pub mod units;
pub mod worker_registry;

pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use finalizer::{Finalizer, PngFinalizer, RenderedScene, RenderedUnit};
pub use ledger::SceneLedger;
pub use scene::{SceneProgress, SceneScheduler, SubmitOutcome};
pub use session::Session;
