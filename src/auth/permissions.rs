/*!
 * # Permissions Module
 *
 * Defines the capabilities used by the testing workflow. Capabilities are
 * typed constants in `module:action` form, checked through the
 * `PermissionOracle` seam rather than looked up as free-form strings.
 */

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Permission definition
#[derive(Debug, Clone)]
pub struct Permission {
    pub name: &'static str,
    pub description: &'static str,
    pub module: &'static str,
    pub action: &'static str,
}

/// Permission actions
pub struct Actions;

impl Actions {
    pub const READ: &'static str = "read";
    pub const CREATE: &'static str = "create";
    pub const ACCEPT: &'static str = "accept";
    pub const RECORD: &'static str = "record";
    pub const RETURN: &'static str = "return";
    pub const CANCEL: &'static str = "cancel";
    pub const ALL: &'static str = "*";
}

/// Modules (resource types)
pub struct Modules;

impl Modules {
    pub const TESTING: &'static str = "testing";
    pub const STOCK: &'static str = "stock";
}

/// Common permission string constants for compile-time safety
pub mod consts {
    // Testing requests
    pub const TESTING_READ: &str = "testing:read";
    pub const TESTING_CREATE: &str = "testing:create";
    pub const TESTING_ACCEPT: &str = "testing:accept";
    pub const TESTING_RECORD: &str = "testing:record";
    pub const TESTING_RETURN: &str = "testing:return";
    pub const TESTING_CANCEL: &str = "testing:cancel";

    // Stock ledger views
    pub const STOCK_READ: &str = "stock:read";
}

lazy_static! {
    /// Registry of every capability the service checks, keyed by name.
    pub static ref PERMISSION_REGISTRY: HashMap<&'static str, Permission> = {
        let mut m = HashMap::new();
        for p in [
            Permission {
                name: consts::TESTING_READ,
                description: "View testing requests",
                module: Modules::TESTING,
                action: Actions::READ,
            },
            Permission {
                name: consts::TESTING_CREATE,
                description: "Create a testing request from an outlet",
                module: Modules::TESTING,
                action: Actions::CREATE,
            },
            Permission {
                name: consts::TESTING_ACCEPT,
                description: "Accept a testing request at a testing center",
                module: Modules::TESTING,
                action: Actions::ACCEPT,
            },
            Permission {
                name: consts::TESTING_RECORD,
                description: "Record test results",
                module: Modules::TESTING,
                action: Actions::RECORD,
            },
            Permission {
                name: consts::TESTING_RETURN,
                description: "Return tested stock to its outlet",
                module: Modules::TESTING,
                action: Actions::RETURN,
            },
            Permission {
                name: consts::TESTING_CANCEL,
                description: "Cancel a pending testing request",
                module: Modules::TESTING,
                action: Actions::CANCEL,
            },
            Permission {
                name: consts::STOCK_READ,
                description: "View stock ledgers",
                module: Modules::STOCK,
                action: Actions::READ,
            },
        ] {
            m.insert(p.name, p);
        }
        m
    };
}
