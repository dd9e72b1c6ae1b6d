//! Staging native binaries on the device

use crate::adb::Adb;
use crate::error::{DeviceError, Result};
use std::path::Path;
use tracing::debug;

/// First SDK level whose loader accepts position-independent executables
pub const PIE_MIN_SDK: u32 = 16;

/// True when a directory listing contains `name` as a whole entry
///
/// Listings come back through a pty, so entries may end in `\r`.
pub fn binary_present(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.trim_end_matches('\r') == name)
}

/// PIE binary for SDK >= 16, the `-nopie` build below that
pub fn binary_variant(base: &str, sdk: u32) -> String {
    if sdk >= PIE_MIN_SDK {
        base.to_string()
    } else {
        format!("{}-nopie", base)
    }
}

/// Push a host file to `remote` and mark it executable
pub(crate) async fn push_executable(adb: &Adb, local: &Path, remote: &str) -> Result<()> {
    if !local.is_file() {
        return Err(DeviceError::Setup(format!(
            "native binary missing on host: {}",
            local.display()
        )));
    }
    debug!("pushing {} -> {}", local.display(), remote);
    adb.push(local, remote).await?;
    adb.shell(&format!("chmod 755 {}", remote)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_present_exact_lines() {
        let listing = "minicap\r\nminicap.so\r\nminitouch\r\n";
        assert!(binary_present(listing, "minicap"));
        assert!(binary_present(listing, "minicap.so"));
        assert!(binary_present(listing, "minitouch"));
        assert!(!binary_present("minicap.so\r\n", "minicap"));
        assert!(!binary_present("minitouch-nopie\n", "minitouch"));
    }

    #[test]
    fn test_binary_variant_by_sdk() {
        assert_eq!(binary_variant("minicap", 15), "minicap-nopie");
        assert_eq!(binary_variant("minicap", 16), "minicap");
        assert_eq!(binary_variant("minitouch", 28), "minitouch");
    }
}
