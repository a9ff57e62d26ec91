//! Per-language string tables for everything the bot sends. Only the strings
//! the renderer, the push job and the command handlers actually use.

/// Strings for one language. Templates use `{}` as the single placeholder.
#[derive(Debug, Clone, Copy)]
pub struct Locale {
    pub notice_link_text: &'static str,
    pub attachment_with_word: &'static str,
    pub attachment_noun_singular: &'static str,
    pub attachment_noun_plural: &'static str,
    pub decimal_separator: char,
    pub notice_too_long_template: &'static str,
    pub internal_error_message: &'static str,
    pub authorization_expired_message: &'static str,
    pub no_available_notices_message: &'static str,
    pub banner_notices_muted_message: &'static str,
    pub banner_notices_unmuted_message: &'static str,
    pub preferred_language_set_message: &'static str,
}

impl Locale {
    /// Localized `📎 With N attachment(s):` header line.
    pub fn attachment_list_header(&self, count: usize) -> String {
        let noun = if count == 1 {
            self.attachment_noun_singular
        } else {
            self.attachment_noun_plural
        };
        format!(
            "<i>📎 {} {} {}:</i>",
            self.attachment_with_word, count, noun
        )
    }

    /// Localized "message too long" fallback pointing at the notice's link.
    pub fn notice_too_long(&self, link_url: &str) -> String {
        self.notice_too_long_template.replacen("{}", link_url, 1)
    }
}

static EN: Locale = Locale {
    notice_link_text: "Link",
    attachment_with_word: "With",
    attachment_noun_singular: "attachment",
    attachment_noun_plural: "attachments",
    decimal_separator: '.',
    notice_too_long_template: r#"🤖 Sorry, but this message is too long to be sent by Telegram, please view it through <a href="{}">this link</a>."#,
    internal_error_message: "<i>An internal error has occurred.</i>",
    authorization_expired_message: "Your <i>FIB API</i> authorization has expired, please /login again.",
    no_available_notices_message: "<i>No available notices.</i>",
    banner_notices_muted_message: "Banner notices (those not belonging to a subject, e.g. elections) are now muted, you can re-enable their notifications with /toggle_mute_banner_notices.",
    banner_notices_unmuted_message: "Banner notice notifications are now enabled, you can mute them with /toggle_mute_banner_notices.",
    preferred_language_set_message: "Your preferred language has been set to English.",
};

static ES: Locale = Locale {
    notice_link_text: "Enlace",
    attachment_with_word: "Con",
    attachment_noun_singular: "adjunto",
    attachment_noun_plural: "adjuntos",
    decimal_separator: ',',
    notice_too_long_template: r#"🤖 Lo siento, pero este mensaje es demasiado largo para enviarlo por Telegram, por favor véalo a través de <a href="{}">este enlace</a>."#,
    internal_error_message: "<i>Se ha producido un error interno.</i>",
    authorization_expired_message: "Tu autorización de <i>FIB API</i> ha caducado, por favor, /login para iniciar la sesión de nuevo.",
    no_available_notices_message: "<i>No hay avisos disponibles.</i>",
    banner_notices_muted_message: "Has silenciado los avisos de banner (los que no son de asignaturas, por ejemplo, elecciones), puedes reactivar las notificaciones con /toggle_mute_banner_notices.",
    banner_notices_unmuted_message: "Has activado las notificaciones de los avisos de banner, puedes silenciarlos con /toggle_mute_banner_notices.",
    preferred_language_set_message: "Tu idioma preferido se ha configurado a castellano.",
};

static CA: Locale = Locale {
    notice_link_text: "Enllaç",
    attachment_with_word: "Amb",
    attachment_noun_singular: "adjunt",
    attachment_noun_plural: "adjunts",
    decimal_separator: ',',
    notice_too_long_template: r#"🤖 Ho sento, però aquest missatge és massa llarg per enviar-lo per Telegram, si us plau consulteu-lo a través <a href="{}">d'aquest enllaç</a>."#,
    internal_error_message: "<i>S'ha produït un error intern.</i>",
    authorization_expired_message: "La teva autorització de <i>FIB API</i> ha caducat, si us plau, /login per iniciar la sessió de nou.",
    no_available_notices_message: "<i>No hi ha avisos disponibles.</i>",
    banner_notices_muted_message: "Has silenciat els avisos de banner (aquells que no són d'assignatures, per exemple, eleccions), pots reactivar les notificacions amb /toggle_mute_banner_notices.",
    banner_notices_unmuted_message: "Has activat les notificacions dels avisos de banner, pots silenciar-los amb /toggle_mute_banner_notices.",
    preferred_language_set_message: "El teu idioma preferit s'ha configurat a català.",
};

/// Returns the string table for a language code, falling back to English.
pub fn get(language_code: &str) -> &'static Locale {
    match language_code {
        "es" => &ES,
        "ca" => &CA,
        _ => &EN,
    }
}

/// Language codes with a string table, in menu order.
pub const SUPPORTED: [&str; 3] = ["en", "es", "ca"];
