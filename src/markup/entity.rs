//! HTML entity decoding
//!
//! Covers numeric references and the named entities that actually show up in
//! article prose. Unknown names are left undecoded.

/// Decode a single entity body (the part between `&` and `;`).
pub fn decode_entity(body: &str) -> Option<String> {
    if let Some(numeric) = body.strip_prefix('#') {
        let code = if let Some(hex) = numeric
            .strip_prefix('x')
            .or_else(|| numeric.strip_prefix('X'))
        {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            numeric.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(|c| c.to_string());
    }

    let decoded = match body {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "minus" => "\u{2212}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "times" => "\u{d7}",
        "divide" => "\u{f7}",
        "deg" => "\u{b0}",
        "prime" => "\u{2032}",
        "Prime" => "\u{2033}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "sect" => "\u{a7}",
        "para" => "\u{b6}",
        "euro" => "\u{20ac}",
        "pound" => "\u{a3}",
        "yen" => "\u{a5}",
        "cent" => "\u{a2}",
        "frac12" => "\u{bd}",
        "frac14" => "\u{bc}",
        "frac34" => "\u{be}",
        "thinsp" => "\u{2009}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "shy" => "\u{ad}",
        "zwj" => "\u{200d}",
        "zwnj" => "\u{200c}",
        _ => return None,
    };

    Some(decoded.to_string())
}

/// Length in bytes of a well-formed entity at the start of `text`, if any.
///
/// Only the syntax is checked; whether the name is known is up to
/// [`decode_entity`].
pub fn entity_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'&') {
        return None;
    }

    let mut i = 1;
    let numeric = bytes.get(i) == Some(&b'#');
    if numeric {
        i += 1;
        let hex = matches!(bytes.get(i), Some(b'x') | Some(b'X'));
        if hex {
            i += 1;
        }
        let digits_start = i;
        while i < bytes.len()
            && (if hex {
                bytes[i].is_ascii_hexdigit()
            } else {
                bytes[i].is_ascii_digit()
            })
        {
            i += 1;
        }
        if i == digits_start {
            return None;
        }
    } else {
        if !bytes.get(i).is_some_and(|b| b.is_ascii_alphabetic()) {
            return None;
        }
        while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
            i += 1;
        }
    }

    if bytes.get(i) == Some(&b';') {
        Some(i + 1)
    } else {
        None
    }
}

/// Replace every decodable entity in `text`.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        match entity_len(rest).and_then(|len| decode_entity(&rest[1..len - 1]).map(|d| (len, d))) {
            Some((len, decoded)) => {
                out.push_str(&decoded);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}
