// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use log::debug;

use crate::error::InvokerError;
use crate::payload::InvokerKind;

/// Name of the kernel this process runs on, as reported by uname.
#[cfg(target_os = "linux")]
pub fn host_system() -> String {
    match nix::sys::utsname::uname() {
        Ok(uname) => uname.sysname().to_string_lossy().into_owned(),
        Err(err) => {
            debug!("uname failed ({err}), falling back to the compile-time target");
            std::env::consts::OS.to_string()
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn host_system() -> String {
    std::env::consts::OS.to_string()
}

/// Only linux hosts can run jobs locally in the background.
pub fn supports_local_execution() -> bool {
    host_system().eq_ignore_ascii_case("linux")
}

/// Capability check consulted once when a local invoker is constructed.
pub fn ensure_supported(invoker: InvokerKind) -> Result<(), InvokerError> {
    if supports_local_execution() {
        debug!("host supports the {invoker} invoker");
        Ok(())
    } else {
        Err(InvokerError::PlatformUnsupported {
            invoker,
            os: host_system(),
        })
    }
}
