//! Naming heuristics that map parameter and path names onto resource names.
//!
//! Everything here is a pure string function. The heuristics are
//! intentionally conservative: a parameter that does not look like a
//! resource identifier yields `None` rather than a guess.

/// Resource name suggested by a parameter name.
///
/// `userId`, `userID` and `user_id` all point at `User`; a bare `id` is
/// resolved from the surrounding path.
pub fn from_parameter(parameter: &str, path: &str) -> Option<String> {
    let (prefix, _) = split_parameter_name(parameter);
    if !prefix.is_empty() {
        let name = to_pascal_case(&to_singular(prefix));
        return (!name.is_empty()).then_some(name);
    }
    if parameter == "id" {
        return from_path(path);
    }
    None
}

/// Resource name implied by the last static segment of a path.
///
/// `/users/{id}` gives `User`; the API root gives `None`.
pub fn from_path(path: &str) -> Option<String> {
    let segment = path
        .split('/')
        .filter(|segment| !segment.is_empty() && !segment.contains('{'))
        .last()?;
    Some(to_pascal_case(&to_singular(segment)))
}

const IRREGULAR: &[(&str, &str)] = &[
    ("echo", "echoes"),
    ("dingo", "dingoes"),
    ("volcano", "volcanoes"),
    ("tornado", "tornadoes"),
    ("torpedo", "torpedoes"),
    ("genus", "genera"),
    ("viscus", "viscera"),
    ("stigma", "stigmata"),
    ("stoma", "stomata"),
    ("dogma", "dogmata"),
    ("lemma", "lemmata"),
    ("anathema", "anathemata"),
    ("ox", "oxen"),
    ("axe", "axes"),
    ("die", "dice"),
    ("yes", "yeses"),
    ("foot", "feet"),
    ("eave", "eaves"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("quiz", "quizzes"),
    ("human", "humans"),
    ("proof", "proofs"),
    ("carve", "carves"),
    ("valve", "valves"),
    ("looey", "looies"),
    ("thief", "thieves"),
    ("groove", "grooves"),
    ("pickaxe", "pickaxes"),
    ("passerby", "passersby"),
    ("canvas", "canvases"),
    ("status", "statuses"),
    ("use", "uses"),
    ("case", "cases"),
    ("vase", "vases"),
    ("house", "houses"),
    ("mouse", "mice"),
    ("reuse", "reuses"),
    ("abuse", "abuses"),
    ("excuse", "excuses"),
    ("cause", "causes"),
    ("pause", "pauses"),
    ("base", "bases"),
    ("phase", "phases"),
    ("rose", "roses"),
    ("dose", "doses"),
    ("nose", "noses"),
    ("horse", "horses"),
    ("course", "courses"),
    ("purpose", "purposes"),
    ("response", "responses"),
    ("sense", "senses"),
    ("tense", "tenses"),
    ("expense", "expenses"),
    ("license", "licenses"),
    ("defense", "defenses"),
];

const UNCOUNTABLE: &[&str] = &[
    "adulthood", "advice", "agenda", "aid", "aircraft", "alcohol", "ammo",
    "analytics", "anime", "athletics", "audio", "bison", "blood", "bream",
    "buffalo", "butter", "carp", "cash", "chassis", "chess", "clothing", "cod",
    "commerce", "cooperation", "corps", "debris", "deer", "diabetes",
    "digestion", "elk", "energy", "equipment", "excretion", "expertise",
    "firmware", "flounder", "fun", "gallows", "garbage", "graffiti",
    "hardware", "headquarters", "health", "herpes", "highjinks", "homework",
    "housework", "information", "jeans", "justice", "kudos", "labour",
    "literature", "machinery", "mackerel", "mail", "manga", "means", "media",
    "mews", "moose", "mud", "music", "news", "only", "personnel", "pike",
    "plankton", "pliers", "police", "pollution", "premises", "rain",
    "research", "rice", "salmon", "scissors", "series", "sewage", "shambles",
    "sheep", "shrimp", "software", "species", "staff", "swine", "tennis",
    "traffic", "transportation", "trout", "tuna", "wealth", "welfare",
    "whiting", "wildebeest", "wildlife", "you",
];

fn is_vowel(byte: u8) -> bool {
    matches!(byte, b'a' | b'e' | b'i' | b'o' | b'u')
}

pub fn to_singular(word: &str) -> String {
    if UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, plural)| *plural == word) {
        return singular.to_string();
    }
    let bytes = word.as_bytes();
    if word.ends_with("ies") && bytes.len() > 3 && !is_vowel(bytes[bytes.len() - 4]) {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if word.ends_with("sses") {
        return word[..word.len() - 2].to_string();
    }
    if ["xes", "zes", "ches", "shes"]
        .iter()
        .any(|suffix| word.ends_with(suffix))
    {
        return word[..word.len() - 2].to_string();
    }
    if word.ends_with("ses") && word.len() > 3 {
        return word[..word.len() - 2].to_string();
    }
    // `class`, `status`, `analysis` are already singular.
    if ["ss", "us", "is"].iter().any(|suffix| word.ends_with(suffix)) {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix('s') {
        return stem.to_string();
    }
    word.to_string()
}

pub fn to_plural(word: &str) -> String {
    if UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == word) {
        return plural.to_string();
    }
    let bytes = word.as_bytes();
    if word.ends_with('y') && bytes.len() > 1 && !is_vowel(bytes[bytes.len() - 2]) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| word.ends_with(suffix))
    {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// `user_profile` / `user-profile` -> `UserProfile`.
///
/// Each underscore-separated word is capitalized and the rest of it
/// lower-cased, so `userProfile` becomes `Userprofile`.
pub fn to_pascal_case(text: &str) -> String {
    text.replace('-', "_")
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

/// `UserProfile` -> `user_profile`.
pub fn to_snake_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + 4);
    for (idx, ch) in text.replace('-', "_").chars().enumerate() {
        if idx > 0 && ch.is_uppercase() {
            result.push('_');
        }
        result.extend(ch.to_lowercase());
    }
    result
}

/// Finds the resource field a parameter most likely refers to.
///
/// Tried in order: exact match, case/separator-insensitive match,
/// `channelId` -> `Channel.id`, and `id` -> `Channel.channelId`.
pub fn find_matching_field<'a>(
    parameter: &str,
    resource: &str,
    fields: &'a [String],
) -> Option<&'a str> {
    if let Some(field) = fields.iter().find(|field| *field == parameter) {
        return Some(field.as_str());
    }

    let parameter_normalized = normalize(parameter);
    let resource_normalized = normalize(resource);

    if let Some(field) = fields
        .iter()
        .find(|field| normalize(field) == parameter_normalized)
    {
        return Some(field.as_str());
    }

    let (prefix, suffix) = split_parameter_name(parameter);
    if !prefix.is_empty() && normalize(prefix) == resource_normalized {
        let suffix_normalized = normalize(suffix);
        if let Some(field) = fields
            .iter()
            .find(|field| normalize(field) == suffix_normalized)
        {
            return Some(field.as_str());
        }
    }

    if prefix.is_empty() && !suffix.is_empty() {
        let expected = resource_normalized + &normalize(suffix);
        if let Some(field) = fields.iter().find(|field| normalize(field) == expected) {
            return Some(field.as_str());
        }
    }

    None
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['_', '-'], "")
}

/// Splits `channelId` into `("channel", "Id")` and `user_id` into
/// `("user", "_id")`. Names without an id suffix have an empty prefix.
pub fn split_parameter_name(name: &str) -> (&str, &str) {
    for suffix in ["Id", "ID", "_id"] {
        if name.len() > suffix.len() && name.ends_with(suffix) {
            return name.split_at(name.len() - suffix.len());
        }
    }
    ("", name)
}

/// Removes at most one prefix and one suffix, compared case-insensitively.
pub fn strip_affixes<'a>(name: &'a str, prefixes: &[&str], suffixes: &[&str]) -> &'a str {
    let mut result = name.trim();
    if let Some(prefix) = prefixes
        .iter()
        .find(|prefix| starts_with_ignore_case(result, prefix))
    {
        result = &result[prefix.len()..];
    }
    if let Some(suffix) = suffixes
        .iter()
        .find(|suffix| ends_with_ignore_case(result, suffix))
    {
        result = &result[..result.len() - suffix.len()];
    }
    result.trim()
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn ends_with_ignore_case(text: &str, suffix: &str) -> bool {
    text.len() >= suffix.len()
        && text.is_char_boundary(text.len() - suffix.len())
        && text[text.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}
