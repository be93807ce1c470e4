//! Wire codec for the results manifest.
//!
//! Output locations are recorded as tokens relative to the workspace output
//! directory (`o/...`) or the input artifact (`i/...`), with `/` as the wire
//! separator regardless of the host separator, so cached workspaces can be
//! relocated.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

pub const OUTPUT_TOKEN_PREFIX: &str = "o/";
pub const INPUT_TOKEN_PREFIX: &str = "i/";

/// Encode one output location as a single manifest token.
///
/// Only the output directory, the input artifact, and their descendants are
/// legal; anything else is a programmer error in the transformer.
pub fn encode_entry(file: &Path, output_dir: &Path, input_artifact: &Path) -> Result<String> {
    if file == output_dir {
        return Ok(OUTPUT_TOKEN_PREFIX.to_string());
    }
    if file == input_artifact {
        return Ok(INPUT_TOKEN_PREFIX.to_string());
    }
    if let Ok(relative) = file.strip_prefix(output_dir) {
        return Ok(format!("{OUTPUT_TOKEN_PREFIX}{}", wire_path(relative)));
    }
    if let Ok(relative) = file.strip_prefix(input_artifact) {
        return Ok(format!("{INPUT_TOKEN_PREFIX}{}", wire_path(relative)));
    }
    bail!("Invalid result path: {}", file.display())
}

/// Decode one manifest token back to an absolute location.
pub fn decode_line(line: &str, output_dir: &Path, input_artifact: &Path) -> Result<PathBuf> {
    if let Some(rest) = line.strip_prefix(OUTPUT_TOKEN_PREFIX) {
        return Ok(join_wire(output_dir, rest));
    }
    if let Some(rest) = line.strip_prefix(INPUT_TOKEN_PREFIX) {
        return Ok(join_wire(input_artifact, rest));
    }
    bail!("Cannot parse result path string: {line}")
}

fn wire_path(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_wire(base: &Path, rest: &str) -> PathBuf {
    rest.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_encode_as_bare_prefixes() {
        let out = Path::new("/ws/transformed");
        let input = Path::new("/repo/lib.jar");
        assert_eq!(encode_entry(out, out, input).expect("encode"), "o/");
        assert_eq!(encode_entry(input, out, input).expect("encode"), "i/");
    }

    #[test]
    fn descendants_encode_with_forward_slashes() {
        let out = Path::new("/ws/transformed");
        let input = Path::new("/repo/lib.jar");
        assert_eq!(
            encode_entry(&out.join("classes").join("A.class"), out, input).expect("encode"),
            "o/classes/A.class"
        );
        assert_eq!(
            encode_entry(&input.join("META-INF").join("MANIFEST.MF"), out, input).expect("encode"),
            "i/META-INF/MANIFEST.MF"
        );
    }

    #[test]
    fn paths_outside_both_roots_are_rejected() {
        let out = Path::new("/ws/transformed");
        let input = Path::new("/repo/lib.jar");
        let err = encode_entry(Path::new("/tmp/stray.txt"), out, input).unwrap_err();
        assert_eq!(err.to_string(), "Invalid result path: /tmp/stray.txt");
    }

    #[test]
    fn sibling_with_shared_name_prefix_is_rejected() {
        // `/ws/transformed-extra` shares a string prefix with the output
        // directory but is not a descendant of it.
        let out = Path::new("/ws/transformed");
        let input = Path::new("/repo/lib.jar");
        let err = encode_entry(Path::new("/ws/transformed-extra/a"), out, input).unwrap_err();
        assert!(err.to_string().starts_with("Invalid result path:"));
    }

    #[test]
    fn decode_resolves_against_the_right_root() {
        let out = Path::new("/ws/transformed");
        let input = Path::new("/repo/lib.jar");
        assert_eq!(decode_line("o/", out, input).expect("decode"), out);
        assert_eq!(decode_line("i/", out, input).expect("decode"), input);
        assert_eq!(
            decode_line("o/lib.class", out, input).expect("decode"),
            out.join("lib.class")
        );
        assert_eq!(
            decode_line("i/META-INF/MANIFEST.MF", out, input).expect("decode"),
            input.join("META-INF").join("MANIFEST.MF")
        );
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let out = Path::new("/ws/transformed");
        let input = Path::new("/repo/lib.jar");
        let err = decode_line("x/whatever", out, input).unwrap_err();
        assert_eq!(err.to_string(), "Cannot parse result path string: x/whatever");
    }

    #[test]
    fn encode_then_decode_preserves_paths_and_order() {
        let out = Path::new("/ws/transformed");
        let input = Path::new("/repo/lib.jar");
        let files = vec![
            out.join("b.class"),
            input.to_path_buf(),
            out.join("a").join("c.class"),
            out.to_path_buf(),
        ];
        let decoded: Vec<PathBuf> = files
            .iter()
            .map(|file| encode_entry(file, out, input).expect("encode"))
            .map(|line| decode_line(&line, out, input).expect("decode"))
            .collect();
        assert_eq!(decoded, files);
    }
}
