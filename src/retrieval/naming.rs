use chrono::Utc;

// in characters, not bytes
const MAX_NAME_LEN: usize = 80;
pub const EXTENSION: &str = "mp4";

/// A file name for the video, derived from its title.
pub fn output_file_name(title: &str) -> String {
  format!("{}.{EXTENSION}", sanitize(title))
}

/// Makes `title` usable as a file name on any common filesystem: reserved
/// characters become `_`, control characters are dropped, and the result
/// is capped at `MAX_NAME_LEN` characters. Falls back to a timestamp based
/// name when nothing is left.
pub fn sanitize(title: &str) -> String {
  let name: String = title
    .trim()
    .chars()
    .filter(|c| !c.is_control())
    .map(|c| match c {
      '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
      c => c,
    })
    .take(MAX_NAME_LEN)
    .collect();

  let name = name.trim();
  if name.is_empty() {
    return format!("rutube_{}", Utc::now().timestamp());
  }

  name.to_string()
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_reserved_characters_are_replaced() {
    assert_eq!(sanitize(r#"a/b\c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
    assert_eq!(sanitize("what?!"), "what_!");
    assert_eq!(sanitize("<>"), "__");
  }

  #[test]
  fn test_control_characters_are_dropped() {
    assert_eq!(sanitize("line\none\ttab\u{7f}"), "lineonetab");
  }

  #[test]
  fn test_length_is_capped() {
    let long = "я".repeat(200);
    let name = sanitize(&long);
    assert_eq!(name.chars().count(), MAX_NAME_LEN);
  }

  #[test]
  fn test_empty_falls_back_to_timestamp() {
    for title in ["", "   ", "\n\t\u{1}"] {
      let name = sanitize(title);
      let ts = name.strip_prefix("rutube_").unwrap();
      assert!(ts.parse::<i64>().unwrap() > 0);
    }
  }

  #[test]
  fn test_sanitize_is_deterministic() {
    let title = "  Клип: «Лето» / 2024 ";
    assert_eq!(sanitize(title), sanitize(title));
    assert_eq!(sanitize(title), "Клип_ «Лето» _ 2024");
  }

  #[test]
  fn test_output_file_name() {
    assert_eq!(output_file_name("Clip"), "Clip.mp4");
  }
}
