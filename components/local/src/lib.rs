//! Component kinds that read the local system.
//!
//! - `local.file` exports the content of a file, and watches it for changes.
//! - `local.env` exports environment variables.

use weft::schema::Registration;

mod env;
mod file;

pub use env::LocalEnv;
pub use file::LocalFile;

/// Returns the registrations of the `local.*` kinds.
pub fn kinds() -> Vec<Registration> {
    weft::components![LocalFile, LocalEnv]
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;
    use weft::{
        controller::{ControlHandle, Controller, ControllerOptions},
        schema::Registry,
    };

    /// Starts a controller that knows the `local.*` kinds and the testing kinds.
    pub(crate) fn start() -> ControlHandle {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut registry = Registry::builder();
        registry.register_all(crate::kinds()).unwrap();
        registry.register_all(weft::test::kinds()).unwrap();
        let controller = Controller::new(registry.build(), ControllerOptions::default());
        let (handle, _task) = controller.start(CancellationToken::new(), &tokio::runtime::Handle::current());
        handle
    }
}
