//! Filename rules for volume sets
//!
//! Part numbers derived here are 1-based for RAR: `x.part1.rar` and `x.rar`
//! are volume 1, `x.r00` is volume 2. 7z volumes use the number after
//! `.7z.`, with a bare `.7z` sorting first as 0.

/// Extensions treated as video for missing-article policy and existence checks
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "mpg", "mpeg", "ts", "m2ts", "webm", "flv", "vob",
    "divx", "ogm",
];

/// Group a filename falls into before probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// `.7z` or `.7z.NNN`
    SevenZipVolume,
    /// `.rar`, `.rNN` or `.partNN.rar`
    RarVolume,
    /// `*.mkv.NNN`
    SplitMkv,
    /// Anything else
    Plain,
}

/// Archive name and 1-based part number of a RAR volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RarVolumeName {
    /// Name shared by every volume of the set
    pub archive: String,
    /// 1-based volume number
    pub part_number: i32,
}

/// Archive name and volume number of a 7z volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevenZipVolumeName {
    /// Name shared by every volume of the set
    pub archive: String,
    /// Number after `.7z.`, 0 for a bare `.7z`
    pub volume: u32,
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Split `name` into stem and extension (without the dot)
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

/// Classify a filename by its extension pattern
pub fn classify_name(name: &str) -> FileKind {
    if sevenzip_volume_name(name).is_some() {
        FileKind::SevenZipVolume
    } else if rar_volume_name(name).is_some() {
        FileKind::RarVolume
    } else if split_mkv_name(name).is_some() {
        FileKind::SplitMkv
    } else {
        FileKind::Plain
    }
}

/// Parse RAR volume naming: `x.partN.rar`, `x.rar`, `x.rNN`
pub fn rar_volume_name(name: &str) -> Option<RarVolumeName> {
    let lower = name.to_ascii_lowercase();

    if let Some(stem_len) = lower.strip_suffix(".rar").map(str::len) {
        let stem = &lower[..stem_len];
        if let Some(pos) = stem.rfind(".part")
            && all_digits(&stem[pos + 5..])
        {
            let part_number = stem[pos + 5..].parse().ok()?;
            return Some(RarVolumeName {
                archive: name[..pos].to_string(),
                part_number,
            });
        }
        return Some(RarVolumeName {
            archive: name[..stem_len].to_string(),
            part_number: 1,
        });
    }

    let (stem, ext) = split_extension(&lower);
    let digits = ext?.strip_prefix('r')?;
    if digits.len() < 2 || !all_digits(digits) {
        return None;
    }
    let number: i32 = digits.parse().ok()?;
    Some(RarVolumeName {
        archive: name[..stem.len()].to_string(),
        part_number: number + 2,
    })
}

/// Parse 7z volume naming: `x.7z`, `x.7z.NNN`
pub fn sevenzip_volume_name(name: &str) -> Option<SevenZipVolumeName> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".7z") {
        return Some(SevenZipVolumeName {
            archive: name[..name.len() - 3].to_string(),
            volume: 0,
        });
    }
    let (stem, ext) = split_extension(&lower);
    let ext = ext?;
    if !all_digits(ext) || !stem.ends_with(".7z") {
        return None;
    }
    Some(SevenZipVolumeName {
        archive: name[..stem.len() - 3].to_string(),
        volume: ext.parse().ok()?,
    })
}

/// Parse split media naming `x.mkv.NNN` into `(x.mkv, NNN)`
pub fn split_mkv_name(name: &str) -> Option<(String, u32)> {
    let (stem, ext) = split_extension(name);
    let ext = ext?;
    if !all_digits(ext) || !stem.to_ascii_lowercase().ends_with(".mkv") {
        return None;
    }
    Some((stem.to_string(), ext.parse().ok()?))
}

/// Numeric suffix after the last dot, if any
pub fn split_suffix(name: &str) -> Option<u32> {
    let (_, ext) = split_extension(name);
    ext.filter(|e| all_digits(e)).and_then(|e| e.parse().ok())
}

/// Whether the name carries a video extension, ignoring a numeric split suffix
pub fn is_video_file(name: &str) -> bool {
    let (stem, ext) = split_extension(name);
    let ext = match ext {
        Some(e) if all_digits(e) => split_extension(stem).1,
        other => other,
    };
    ext.is_some_and(|e| {
        let e = e.to_ascii_lowercase();
        VIDEO_EXTENSIONS.contains(&e.as_str())
    })
}

/// Heuristic for release names hidden behind random-looking strings
///
/// True for hex digests (30+ hex digits) and for long separator-free
/// alphanumeric strings mixing letters and digits without any run of six
/// lowercase letters (which would look like a word).
pub fn is_probably_obfuscated(file_name: &str) -> bool {
    let (stem, _) = split_extension(file_name);
    let stem = stem.trim();
    if stem.is_empty() {
        return true;
    }
    if stem.len() >= 30 && stem.bytes().all(|b| b.is_ascii_hexdigit()) {
        return true;
    }
    if stem.len() < 16 || !stem.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return false;
    }
    let has_digit = stem.bytes().any(|b| b.is_ascii_digit());
    let has_letter = stem.bytes().any(|b| b.is_ascii_alphabetic());

    let mut run = 0;
    let mut longest_lower_run = 0;
    for b in stem.bytes() {
        if b.is_ascii_lowercase() {
            run += 1;
            longest_lower_run = longest_lower_run.max(run);
        } else {
            run = 0;
        }
    }

    has_digit && has_letter && longest_lower_run < 6
}

fn looks_like_filename(token: &str) -> bool {
    match split_extension(token) {
        (stem, Some(ext)) => {
            !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

/// Best-effort filename from a Usenet subject line
///
/// Prefers a quoted name, then the last token that looks like a filename,
/// then the whole trimmed subject.
pub fn subject_filename(subject: &str) -> String {
    if let Some(start) = subject.find('"') {
        let rest = &subject[start + 1..];
        if let Some(end) = rest.find('"')
            && end > 0
        {
            return rest[..end].trim().to_string();
        }
    }

    subject
        .split_whitespace()
        .rev()
        .map(|token| token.trim_matches(|c| matches!(c, '[' | ']' | '(' | ')' | '<' | '>')))
        .find(|token| looks_like_filename(token))
        .map_or_else(|| subject.trim().to_string(), ToString::to_string)
}
