//! mirage: presents a fabricated hardware identity to the process this
//! module is loaded into. Inventory queries and the registry reads that
//! back them are intercepted in place and answered from an operator
//! supplied configuration; everything unrecognized reaches the real
//! subsystem untouched. The host machine itself is never modified.

pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod forge;
pub mod hooks;
pub mod identity;
pub mod masquerade;
pub mod shadow;

#[cfg(windows)]
pub mod dynamo;
#[cfg(windows)]
pub mod wbem;

pub use config::ConfigStore;
pub use engine::SpoofEngine;
pub use error::MirageError;
pub use factory::{Factory, SyntheticObject, SyntheticObjectSet};
pub use forge::Forge;
pub use identity::{DeviceCategory, HardwareIdentity};

#[cfg(windows)]
mod exports {
    use std::ffi::c_void;
    use std::path::Path;

    use anyhow::Context;
    use tracing::{error, info};
    use windows::Win32::Foundation::{BOOL, HMODULE};
    use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use crate::{config, dynamo, engine};

    const LOG_FILE: &str = "mirage.log";

    fn attach() -> anyhow::Result<()> {
        engine::init_logging(Path::new(LOG_FILE));
        info!("attach thread running");
        let engine = engine::init(config::CONFIG_FILE, Box::new(dynamo::IatPatcher));
        let status = engine
            .install(&engine::windows_targets())
            .context("interception install transaction")?;
        info!(?status, "interception installed");
        Ok(())
    }

    fn detach() {
        if let Some(engine) = engine::instance() {
            if engine.is_installed() {
                let _ = engine.remove();
            }
        }
    }

    /// Loader entry point. All real work happens on a one-shot thread;
    /// nothing here may take locks another initializer could hold.
    #[no_mangle]
    extern "system" fn DllMain(module: HMODULE, reason: u32, _reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                unsafe {
                    let _ = DisableThreadLibraryCalls(module);
                }
                std::thread::spawn(|| {
                    if let Err(err) = attach() {
                        error!(%err, "attach failed");
                    }
                });
            }
            DLL_PROCESS_DETACH => detach(),
            _ => {}
        }
        BOOL::from(true)
    }

    // Diagnostic surface for the delivering process. Callable any time
    // after attach, synchronous, no side effects beyond the obvious.

    #[no_mangle]
    pub extern "system" fn IsHookInstalled() -> BOOL {
        BOOL::from(engine::instance().map(|e| e.is_installed()).unwrap_or(false))
    }

    #[no_mangle]
    pub extern "system" fn ReloadConfig() -> BOOL {
        match engine::instance() {
            Some(engine) => BOOL::from(engine.reload()),
            None => BOOL::from(false),
        }
    }

    /// Liveness probe: proves the module is loaded and exporting.
    #[no_mangle]
    pub extern "system" fn TestFunction() -> BOOL {
        BOOL::from(true)
    }
}
