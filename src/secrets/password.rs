use rand::distributions::Alphanumeric;
use rand::Rng;

pub const PASSWORD_LENGTH: usize = 256;

/// Fresh random keystore password, never reused between launches
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}
