//! Interface probes that bypass the configuration store: the device type
//! as the kernel exposes it in procfs/sysfs, and the administrative up flag.

use crate::config::ProbeConfig;
use std::fmt;
use std::fs;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to open socket for interface ioctl: {0}")]
    Socket(String),

    #[error("interface flag query not supported on this platform")]
    Unsupported,
}

/// Kernel device type of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceType {
    Ethernet,
    Vlan,
    Bridge,
    Bond,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Ethernet => "ethernet",
            InterfaceType::Vlan => "vlan",
            InterfaceType::Bridge => "bridge",
            InterfaceType::Bond => "bond",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies `name`: a VLAN has a regular file under the proc VLAN
/// directory, a bridge or bond has a `bridge` or `bonding` directory under
/// its sysfs node, anything else is ethernet.
pub fn probe_interface_type(config: &ProbeConfig, name: &str) -> InterfaceType {
    let vlan = config.proc_vlan_dir.join(name);
    let kind = if fs::metadata(&vlan).is_ok_and(|m| m.is_file()) {
        InterfaceType::Vlan
    } else {
        let device = config.sysfs_net_dir.join(name);
        if device.join("bridge").is_dir() {
            InterfaceType::Bridge
        } else if device.join("bonding").is_dir() {
            InterfaceType::Bond
        } else {
            InterfaceType::Ethernet
        }
    };
    trace!(interface = %name, kind = %kind, "probed interface type");
    kind
}

#[cfg(target_os = "linux")]
mod flags {
    use super::ProbeError;
    use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
    use std::os::fd::{AsRawFd, OwnedFd};
    use tracing::{debug, trace};

    /// Connectionless socket used only for SIOCGIFFLAGS queries.
    #[derive(Debug)]
    pub struct FlagSocket {
        fd: OwnedFd,
    }

    impl FlagSocket {
        pub fn open() -> Result<Self, ProbeError> {
            let fd = socket(
                AddressFamily::Inet,
                SockType::Stream,
                SockFlag::SOCK_CLOEXEC,
                None,
            )
            .map_err(|e| ProbeError::Socket(e.to_string()))?;
            debug!("opened interface flag socket");
            Ok(Self { fd })
        }

        /// Whether `name` is administratively up. Any ioctl failure,
        /// including an unknown interface, reads as down.
        pub fn is_up(&self, name: &str) -> bool {
            // SAFETY: ifreq is plain old data; all-zero is a valid value.
            let mut req: libc::ifreq = unsafe { std::mem::zeroed() };

            // The name is truncated to IFNAMSIZ - 1 bytes and stays
            // NUL-terminated.
            for (dst, src) in req
                .ifr_name
                .iter_mut()
                .zip(name.bytes().take(libc::IFNAMSIZ - 1))
            {
                *dst = src as libc::c_char;
            }

            // The request type differs between C libraries.
            let Some(request) = libc::Ioctl::try_from(libc::SIOCGIFFLAGS).ok() else {
                trace!(interface = %name, "SIOCGIFFLAGS does not fit the ioctl request type");
                return false;
            };

            // SAFETY: fd is an open socket and req outlives the call.
            let ret = unsafe {
                libc::ioctl(self.fd.as_raw_fd(), request, &mut req as *mut libc::ifreq)
            };
            if ret != 0 {
                trace!(interface = %name, "SIOCGIFFLAGS failed");
                return false;
            }

            // SAFETY: a successful SIOCGIFFLAGS fills ifru_flags.
            let flags = unsafe { req.ifr_ifru.ifru_flags };
            i32::from(flags) & libc::IFF_UP == libc::IFF_UP
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod flags {
    use super::ProbeError;

    /// Stand-in on platforms without SIOCGIFFLAGS.
    #[derive(Debug)]
    pub struct FlagSocket;

    impl FlagSocket {
        pub fn open() -> Result<Self, ProbeError> {
            Err(ProbeError::Unsupported)
        }

        pub fn is_up(&self, _name: &str) -> bool {
            false
        }
    }
}

pub use flags::FlagSocket;
