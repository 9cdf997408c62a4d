//! Privilege model for module entry points

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::module::traits::{Coordinate, ModuleError};

/// Privilege tag attached to a loaded module
///
/// Ordered: `Full` satisfies every requirement `Restricted` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    /// Module failed or skipped trust vetting
    Restricted,
    /// Module passed the trust sandbox
    Full,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::Restricted => write!(f, "restricted"),
            Privilege::Full => write!(f, "full"),
        }
    }
}

impl Privilege {
    /// Check whether this privilege satisfies a requirement
    #[inline]
    pub fn satisfies(self, required: Privilege) -> bool {
        self >= required
    }
}

/// Check a module's privilege before invoking its entry point
pub fn check_privilege(
    module: &Coordinate,
    held: Privilege,
    required: Privilege,
) -> Result<(), ModuleError> {
    if !held.satisfies(required) {
        warn!(
            "Module {} denied entry point invocation (holds {}, requires {})",
            module, held, required
        );
        return Err(ModuleError::PermissionDenied(format!(
            "module {} holds {} privilege, entry point requires {}",
            module, held, required
        )));
    }

    debug!("Module {} granted entry point invocation ({})", module, held);
    Ok(())
}
