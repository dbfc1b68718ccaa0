use std::collections::HashMap;

use anyhow::Result;

const EN: &[(&str, &str)] = &[
    ("language", "English"),
    ("cafeReset", "Your Cafe Points will be reset on %d/%d/%d"),
    ("commandDisabled", "%s command is disabled"),
    ("ravienteBerserk", "<Great Slaying: Berserk> is being held!"),
    ("ravienteExtreme", "<Great Slaying: Extreme> is being held!"),
    ("ravienteExtremeLimited", "<Great Slaying: Extreme (Limited)> is being held!"),
    ("ravienteBerserkSmall", "<Great Slaying: Berserk (Small)> is being held!"),
];

const JP: &[(&str, &str)] = &[
    ("language", "日本語"),
    ("cafeReset", "%d/%d/%dにカフェポイントがリセットされます"),
    ("commandDisabled", "%sのコマンドは無効です"),
    ("ravienteBerserk", "<大討伐：猛狂期>が開催されました！"),
    ("ravienteExtreme", "<大討伐：猛狂期【極】>が開催されました！"),
    ("ravienteExtremeLimited", "<大討伐：猛狂期【極】(制限付)>が開催されました！"),
    ("ravienteBerserkSmall", "<大討伐：猛狂期(小数)>が開催されました！"),
];

/// Built-in strings for `language`; unknown languages fall back to English.
pub fn lang_strings(language: &str) -> HashMap<String, String> {
    let table = match language {
        "jp" => JP,
        _ => EN,
    };
    table
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Parses a `key: value` lang file. Lines starting with `//` are comments.
pub fn parse_lang_file(content: &str) -> Result<HashMap<String, String>> {
    let mut dict = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("//") || line.is_empty() {
            continue;
        }
        if let Some((key, val)) = line.split_once(':') {
            dict.insert(key.trim().to_string(), val.trim().to_string());
        }
    }
    Ok(dict)
}
