/// Length of a fingerprint in hex characters (128 bits).
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// Version of persisted action records and deployment manifests.
///
/// Stored data with any other version is rejected; there is no migration path.
pub const FORMAT_VERSION: u32 = 4;

/// Preset used when none is given.
pub const DEFAULT_PRESET: &str = "main";

/// Gas limit used to force a failing transaction on-chain so a trace can be captured.
pub const FORCED_GAS_LIMIT: u64 = 15_000_000;

/// Balance (in wei, hex) given to impersonated signers on local backends.
pub const IMPERSONATED_BALANCE: &str = "0x56bc75e2d63100000";

/// Environment variable overriding the store root.
pub const STORE_DIR_ENV: &str = "CANNON_DIRECTORY";

/// Backend control methods used for layered builds and signer impersonation.
pub mod rpc {
  pub const SNAPSHOT: &str = "evm_snapshot";
  pub const REVERT: &str = "evm_revert";
  pub const DUMP_STATE: &str = "anvil_dumpState";
  pub const LOAD_STATE: &str = "anvil_loadState";
  pub const IMPERSONATE: &str = "anvil_impersonateAccount";
  pub const SET_BALANCE: &str = "anvil_setBalance";
}
