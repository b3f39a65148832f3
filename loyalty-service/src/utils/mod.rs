pub mod password;
pub mod validation;

pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use validation::{
    validate_email_shape, validate_password_strength, validation_message, MIN_PASSWORD_LEN,
};
