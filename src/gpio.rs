use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

pub trait SysfsBackend: Send + Sync {
    fn exists(&self, path: &Path) -> impl Future<Output = io::Result<bool>> + Send;
    fn write(&self, path: &Path, contents: &str) -> impl Future<Output = io::Result<()>> + Send;
    fn read_to_string(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send;
}

pub struct GpioController<B: SysfsBackend> {
    root: PathBuf,
    backend: Arc<B>,
}

impl<B: SysfsBackend> GpioController<B> {
    pub fn new(root: impl Into<PathBuf>, backend: Arc<B>) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn direction_path(&self, pin: u32) -> PathBuf {
        self.pin_dir(pin).join("direction")
    }

    fn value_path(&self, pin: u32) -> PathBuf {
        self.pin_dir(pin).join("value")
    }

    async fn write_node(&self, path: PathBuf, contents: &str) -> Result<(), AppError> {
        self.backend
            .write(&path, contents)
            .await
            .map_err(|e| AppError::io(path, e))
    }

    pub async fn is_exported(&self, pin: u32) -> Result<bool, AppError> {
        let dir = self.pin_dir(pin);
        self.backend
            .exists(&dir)
            .await
            .map_err(|e| AppError::io(dir, e))
    }

    pub async fn ensure_exported(&self, pin: u32) -> Result<(), AppError> {
        if self.is_exported(pin).await? {
            return Ok(());
        }
        debug!("exporting gpio{pin}");
        self.write_node(self.root.join("export"), &pin.to_string())
            .await
    }

    pub async fn ensure_unexported(&self, pin: u32) -> Result<(), AppError> {
        if !self.is_exported(pin).await? {
            return Ok(());
        }
        debug!("unexporting gpio{pin}");
        self.write_node(self.root.join("unexport"), &pin.to_string())
            .await
    }

    async fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), AppError> {
        self.write_node(self.direction_path(pin), direction.as_str())
            .await
    }

    pub async fn write_digital(&self, pin: u32, value: u8) -> Result<(), AppError> {
        if value > 1 {
            return Err(AppError::InvalidValue("Value must be 0 or 1".into()));
        }

        self.ensure_exported(pin).await?;
        self.set_direction(pin, Direction::Out).await?;
        self.write_node(self.value_path(pin), &value.to_string())
            .await
    }

    // forces direction to `in`; a driven output level is not read back
    pub async fn read_digital(&self, pin: u32) -> Result<u8, AppError> {
        self.ensure_exported(pin).await?;
        self.set_direction(pin, Direction::In).await?;

        let path = self.value_path(pin);
        let content = self
            .backend
            .read_to_string(&path)
            .await
            .map_err(|e| AppError::io(&path, e))?;
        content
            .trim()
            .parse()
            .map_err(|_| AppError::Parse { path, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockSysfs, SysfsWrite};

    const ROOT: &str = "/sys/class/gpio";

    fn controller() -> GpioController<MockSysfs> {
        GpioController::new(ROOT, Arc::new(MockSysfs::new(ROOT)))
    }

    fn write(path: &str, contents: &str) -> SysfsWrite {
        SysfsWrite {
            path: PathBuf::from(path),
            contents: contents.to_string(),
        }
    }

    #[tokio::test]
    async fn write_digital_on_fresh_pin_exports_then_drives() {
        let gpio = controller();

        gpio.write_digital(17, 1).await.unwrap();

        assert_eq!(
            gpio.backend().writes(),
            vec![
                write("/sys/class/gpio/export", "17"),
                write("/sys/class/gpio/gpio17/direction", "out"),
                write("/sys/class/gpio/gpio17/value", "1"),
            ]
        );
        assert!(gpio.backend().is_exported(17));
    }

    #[tokio::test]
    async fn export_is_written_once() {
        let gpio = controller();

        gpio.ensure_exported(4).await.unwrap();
        gpio.ensure_exported(4).await.unwrap();

        assert_eq!(gpio.backend().writes(), vec![write("/sys/class/gpio/export", "4")]);
    }

    #[tokio::test]
    async fn unexport_of_unexported_pin_writes_nothing() {
        let gpio = controller();

        gpio.ensure_unexported(4).await.unwrap();

        assert!(gpio.backend().writes().is_empty());
    }

    #[tokio::test]
    async fn unexport_releases_exported_pin() {
        let gpio = controller();
        gpio.write_digital(22, 0).await.unwrap();
        gpio.backend().clear_writes();

        gpio.ensure_unexported(22).await.unwrap();
        gpio.ensure_unexported(22).await.unwrap();

        assert_eq!(gpio.backend().writes(), vec![write("/sys/class/gpio/unexport", "22")]);
        assert!(!gpio.is_exported(22).await.unwrap());
    }

    #[tokio::test]
    async fn read_after_write_returns_input_level() {
        let gpio = controller();
        gpio.backend().set_input_level(17, 0);

        gpio.write_digital(17, 1).await.unwrap();
        let value = gpio.read_digital(17).await.unwrap();

        assert_eq!(value, 0);
        assert_eq!(gpio.backend().direction(17), Some(Direction::In));
    }

    #[tokio::test]
    async fn read_digital_sets_direction_in() {
        let gpio = controller();
        gpio.backend().set_input_level(5, 1);

        assert_eq!(gpio.read_digital(5).await.unwrap(), 1);
        assert_eq!(
            gpio.backend().writes(),
            vec![
                write("/sys/class/gpio/export", "5"),
                write("/sys/class/gpio/gpio5/direction", "in"),
            ]
        );
    }

    #[tokio::test]
    async fn non_numeric_value_is_a_parse_error() {
        let gpio = controller();
        gpio.backend().set_raw_value(8, "high\n");

        let err = gpio.read_digital(8).await.unwrap_err();

        match err {
            AppError::Parse { path, content } => {
                assert_eq!(path, PathBuf::from("/sys/class/gpio/gpio8/value"));
                assert_eq!(content, "high\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn value_out_of_range_is_rejected_before_io() {
        let gpio = controller();

        let err = gpio.write_digital(17, 2).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidValue(_)));
        assert!(gpio.backend().writes().is_empty());
    }

    #[tokio::test]
    async fn failed_export_surfaces_raw_io_error() {
        let gpio = controller();
        gpio.backend().deny("/sys/class/gpio/export");

        let err = gpio.write_digital(17, 1).await.unwrap_err();

        match err {
            AppError::Io { path, source } => {
                assert_eq!(path, PathBuf::from("/sys/class/gpio/export"));
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // nothing after the failed export was attempted
        assert_eq!(gpio.backend().writes().len(), 1);
    }

    #[tokio::test]
    async fn failed_direction_write_stops_before_value() {
        let gpio = controller();
        gpio.backend().deny("/sys/class/gpio/gpio17/direction");

        let err = gpio.write_digital(17, 1).await.unwrap_err();

        assert!(matches!(err, AppError::Io { .. }));
        let last = gpio.backend().writes().pop().unwrap();
        assert_eq!(last, write("/sys/class/gpio/gpio17/direction", "out"));
    }
}
