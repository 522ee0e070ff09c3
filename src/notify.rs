//! Guardian notifications. Delivery is simulated: an attempt is validated,
//! logged, and answered with a confirmation text, but nothing leaves the
//! machine.

use serde::Serialize;

pub const MIN_MESSAGE_CHARS: usize = 5;
pub const TOO_SHORT_MESSAGE: &str =
    "Error: El contenido del mensaje es demasiado corto para ser enviado.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub success: bool,
    pub confirmation_message: String,
}

pub fn simulate_send(student_name: &str, guardian_phone: &str, message: &str) -> Delivery {
    if message.chars().count() < MIN_MESSAGE_CHARS {
        return Delivery {
            success: false,
            confirmation_message: TOO_SHORT_MESSAGE.to_string(),
        };
    }
    Delivery {
        success: true,
        confirmation_message: format!(
            "Mensaje enviado (simulado) al apoderado de {} al número {}.",
            student_name, guardian_phone
        ),
    }
}
