//! Text normalization and identifier helpers

use regex_lite::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static RE_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<.*?>").expect("valid regex"));

/// Whitespace runs, typographic quotes, ellipses and double spaces
static RE_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+|„|“|”|\.{2,}| {2,}").expect("valid regex"));

static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));

/// Hex characters kept from the public id digest
const PUBLIC_ID_LEN: usize = 16;

/// Strip markup and collapse noise into single spaces.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let text = text.replace('\u{a0}', " ");
    let text = RE_TAGS.replace_all(&text, " ");
    let text = RE_NOISE.replace_all(&text, " ");
    let collapsed = RE_NOISE.replace_all(text.trim(), " ");
    collapsed.trim().to_string()
}

/// Uppercase the first character, leave the rest untouched
pub fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Escape text for the HTML parse mode of the channel
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the HTML entities found in source pages
pub fn decode_entities(text: &str) -> String {
    RE_ENTITY
        .replace_all(text, |caps: &regex_lite::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(entity)
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "agrave" => 'à',
        "egrave" => 'è',
        "eacute" => 'é',
        "igrave" => 'ì',
        "ograve" => 'ò',
        "ugrave" => 'ù',
        "Agrave" => 'À',
        "Egrave" => 'È',
        "laquo" => '«',
        "raquo" => '»',
        "rsquo" => '\'',
        "lsquo" => '\'',
        "ldquo" => '“',
        "rdquo" => '”',
        "ndash" => '-',
        "hellip" => '…',
        "deg" => '°',
        _ => return None,
    };
    Some(c)
}

/// Canonical form of a source identifier: uppercase, no spaces of any kind
pub fn normalize_external_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Unguessable identifier used in deep links
pub fn public_id(secret: &str, court_id: &str, external_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\x00");
    hasher.update(court_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(external_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..PUBLIC_ID_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_markup_and_noise() {
        let raw = "<p>Ricorso   proposto</p>\u{a0}da „Mario“...\n\tcontro  <b>Comune</b>";
        assert_eq!(normalize(raw), "Ricorso proposto da Mario contro Comune");
    }

    #[test]
    fn test_normalize_idempotent() {
        let inputs = [
            "",
            "   ",
            "a  .. b",
            "<div>x</div><div>y</div>",
            "testo „citato” .... fine",
            "multi\nline\r\ntext",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_normalize_multiline_tag() {
        assert_eq!(normalize("a<span\nclass=\"x\">b</span>c"), "a b c");
    }

    #[test]
    fn test_capitalize_first() {
        assert_eq!(capitalize_first("sentenza breve"), "Sentenza breve");
        assert_eq!(capitalize_first("èssere"), "Èssere");
        assert_eq!(capitalize_first(""), "");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("a < b & \"c\""), "a &lt; b &amp; &quot;c&quot;");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("citt&agrave; &amp; c&#8217;&#x41;"), "città & c’A");
        assert_eq!(decode_entities("&unknown;"), "&unknown;");
    }

    #[test]
    fn test_normalize_external_id() {
        assert_eq!(normalize_external_id("tar/ 123\u{a0}/ 2024 x"), "TAR/123/2024X");
    }

    #[test]
    fn test_public_id_stable_and_secret_dependent() {
        let a = public_id("s3cret", "tar-lazio", "TAR/1/2024");
        assert_eq!(a.len(), 16);
        assert_eq!(a, public_id("s3cret", "tar-lazio", "TAR/1/2024"));
        assert_ne!(a, public_id("other", "tar-lazio", "TAR/1/2024"));
        assert_ne!(a, public_id("s3cret", "tar-lombardia", "TAR/1/2024"));
    }
}
