pub mod actions;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod event_loop;
pub mod logging;
pub mod midi;
pub mod reconnect;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod ui;

pub use cli::Args;
pub use config::Settings;
pub use dispatch::{handler, DispatchTable, Handler, HandlerResult};
pub use router::{OutputHandle, Router, RouterState};
pub use session::{DevicePrompt, Registrar, Session, SessionStatus};
