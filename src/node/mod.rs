mod managed;


pub use managed::ManagedProcess;
