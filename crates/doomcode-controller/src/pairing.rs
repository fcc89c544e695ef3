//! Pairing display.
//!
//! Renders the pairing payload as a terminal QR code with a textual
//! fallback the operator can type in by hand.

use qrcode::render::unicode;
use qrcode::QrCode;
use tracing::warn;

use doomcode_proto::PairingPayload;

use crate::error::ControllerError;

/// Render the scannable block plus the textual fallback.
pub fn render_pairing(payload: &PairingPayload) -> Result<String, ControllerError> {
    let json = payload.encode()?;

    let mut out = String::new();
    out.push_str("Scan to connect your operator device:\n\n");

    match QrCode::new(json.as_bytes()) {
        Ok(code) => {
            let qr = code
                .render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Light)
                .light_color(unicode::Dense1x2::Dark)
                .build();
            out.push_str(&qr);
            out.push('\n');
        }
        Err(e) => {
            // Payload too large for a QR is not fatal; the text form works.
            warn!(error = %e, "QR render failed, showing text only");
        }
    }

    out.push_str("\nOr paste this pairing code:\n");
    out.push_str(&json);
    out.push('\n');
    out.push_str(&format!(
        "\nSession {} (pairing code expires in 5 minutes)\n",
        payload.session_id
    ));
    Ok(out)
}
