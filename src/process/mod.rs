mod keystore_cli;
mod listener;
mod logs;
mod supervisor;


pub use keystore_cli::{InMemorySecureSettings, KeystoreCli, SecureSettingsWriter, SECURE_SETTINGS_FILE};
pub use listener::{ListenerSlot, ProcessListener};
pub use logs::LogCapture;
pub use supervisor::{ProcessInfo, ProcessSupervisor};
