use std::fs;
use std::path::{Path, PathBuf};

/// Where to write the MusicXML for `input`: next to the input unless
/// `requested` names a file or directory.
pub fn resolve_output_path(input: &Path, requested: Option<&str>) -> std::io::Result<PathBuf> {
    let default_name = input
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize_file_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "score".to_string());

    let requested = requested.map(str::trim).unwrap_or("");
    let mut candidate = if requested.is_empty() {
        input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
            .join(format!("{default_name}.musicxml"))
    } else {
        expand_tilde(requested)
    };

    let ends_with_sep = requested.ends_with('/') || requested.ends_with('\\');
    if ends_with_sep || candidate.is_dir() {
        candidate = candidate.join(format!("{default_name}.musicxml"));
    }

    let ext = candidate.extension().and_then(|e| e.to_str()).unwrap_or("");
    if !(ext.eq_ignore_ascii_case("musicxml") || ext.eq_ignore_ascii_case("xml")) {
        candidate.set_extension("musicxml");
    }

    if let Some(parent) = candidate.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    Ok(make_unique_path(candidate))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    let Some(rest) = path.strip_prefix("~/") else {
        return PathBuf::from(path);
    };
    let home = dirs_next::home_dir()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(std::env::temp_dir);
    home.join(rest)
}

pub fn sanitize_file_stem(stem: &str) -> String {
    let mut out = String::new();
    for ch in stem.chars() {
        if ch.is_control()
            || matches!(
                ch,
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\u{0}'
            )
        {
            out.push('_');
            continue;
        }
        out.push(ch);
    }
    out.trim().trim_matches('.').to_string()
}

fn make_unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }

    let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("score")
        .to_string();
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("musicxml")
        .to_string();

    let mut idx = 1u32;
    loop {
        let candidate = parent.join(format!("{stem}-{idx}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_file_stem("op. 9: no/2?"), "op. 9_ no_2_");
        assert_eq!(sanitize_file_stem("..hidden.."), "hidden");
    }

    #[test]
    fn defaults_next_to_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("nocturne.png");
        let out = resolve_output_path(&input, None).expect("resolve");
        assert_eq!(out, dir.path().join("nocturne.musicxml"));
    }

    #[test]
    fn directory_target_gets_default_name_and_existing_files_are_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("etude.jpg");
        fs::write(dir.path().join("etude.musicxml"), b"old").expect("write");

        let target = format!("{}/", dir.path().display());
        let out = resolve_output_path(&input, Some(&target)).expect("resolve");
        assert_eq!(out, dir.path().join("etude-1.musicxml"));
    }

    #[test]
    fn unexpected_extension_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("page.png");
        let target = dir.path().join("out").join("result.txt");
        let out = resolve_output_path(&input, target.to_str()).expect("resolve");
        assert_eq!(out, dir.path().join("out").join("result.musicxml"));
        assert!(dir.path().join("out").is_dir());
    }
}
