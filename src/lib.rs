pub mod backend;
pub mod config;
pub mod error;
pub mod exec;
pub mod gpio;
pub mod routes;
pub mod tasks;

pub use config::{AppConfig, GpioConfig, HttpConfig, TaskConfig};
pub use error::{AppError, ExecError};
pub use exec::{ExecutionLog, ExecutionRequest, execute};
pub use gpio::{Direction, GpioController, SysfsBackend};
pub use routes::AppState;
pub use tasks::{TaskReport, TaskRunner, TaskSummary};

#[cfg(feature = "hardware-gpio")]
pub use backend::KernelSysfs;
pub use backend::{MockSysfs, SysfsWrite};
