// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Template matcher (§4.B): decide whether a concrete string is an instance
//! of a template containing zero or more `{{var_NAME}}` placeholders, and
//! if so return the `name -> value` bindings.
//!
//! Implemented as an explicit backtracking search rather than compiled
//! regex, following the approach in the task-grouping service this
//! component is grounded on: it makes the non-greedy/final-greedy binding
//! rule an explicit invariant of the search instead of emergent regex
//! engine behavior, and placeholder names never need regex-escaping.

use std::collections::HashMap;

/// A template parsed into its alternating fixed/variable structure:
/// `F0 V1 F1 V2 F2 ... Vk Fk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    fixed_parts: Vec<String>,
    var_names: Vec<String>,
}

impl Template {
    /// Parses `{{ name }}` placeholders; whitespace around `name` is
    /// trimmed, `name` is any run of non-`}` characters (§6).
    pub fn parse(template: &str) -> Self {
        let mut fixed_parts = Vec::new();
        let mut var_names = Vec::new();
        let chars: Vec<char> = template.chars().collect();
        let mut i = 0;
        let mut current = String::new();

        while i < chars.len() {
            if i + 1 < chars.len() && chars[i] == '{' && chars[i + 1] == '{' {
                if let Some(end) = find_close(&chars, i + 2) {
                    let name: String = chars[i + 2..end].iter().collect();
                    fixed_parts.push(std::mem::take(&mut current));
                    var_names.push(name.trim().to_string());
                    i = end + 2;
                    continue;
                }
            }
            current.push(chars[i]);
            i += 1;
        }
        fixed_parts.push(current);

        Template {
            fixed_parts,
            var_names,
        }
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }
}

fn find_close(chars: &[char], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '}' && chars[i + 1] == '}' {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Matches `s` against `template`. On success, returns the `name -> value`
/// bindings; repeated placeholder names are required to bind to the same
/// substring (P3).
pub fn match_template(template: &str, s: &str) -> Option<HashMap<String, String>> {
    let parsed = Template::parse(template);
    match_parsed(&parsed, s)
}

pub fn match_parsed(template: &Template, s: &str) -> Option<HashMap<String, String>> {
    let n_vars = template.var_names.len();

    if n_vars == 0 {
        let flat = template.fixed_parts.first().cloned().unwrap_or_default();
        return if flat == s {
            Some(HashMap::new())
        } else {
            None
        };
    }

    let chars: Vec<char> = s.chars().collect();
    let fixed: Vec<Vec<char>> = template
        .fixed_parts
        .iter()
        .map(|f| f.chars().collect())
        .collect();

    let mut suffix_len = vec![0usize; fixed.len() + 1];
    for i in (0..fixed.len()).rev() {
        suffix_len[i] = suffix_len[i + 1] + fixed[i].len();
    }

    let mut bindings = HashMap::new();
    if dfs(
        0,
        0,
        &chars,
        &fixed,
        &template.var_names,
        &suffix_len,
        &mut bindings,
    ) {
        Some(bindings)
    } else {
        None
    }
}

fn occurrences(haystack: &[char], needle: &[char], min_pos: usize) -> Vec<usize> {
    let len = haystack.len();
    if needle.is_empty() {
        return (min_pos..=len).collect();
    }
    let mut out = Vec::new();
    if needle.len() > len {
        return out;
    }
    for start in min_pos..=(len - needle.len()) {
        if haystack[start..start + needle.len()] == *needle {
            out.push(start);
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    i: usize,
    prev_end: usize,
    s: &[char],
    fixed: &[Vec<char>],
    var_names: &[String],
    suffix_len: &[usize],
    bindings: &mut HashMap<String, String>,
) -> bool {
    let n_vars = var_names.len();
    if suffix_len[i] > s.len().saturating_sub(prev_end) {
        return false;
    }

    let part = &fixed[i];
    let min_pos = if i == 0 && !part.is_empty() {
        0
    } else {
        prev_end
    };

    for p in occurrences(s, part, min_pos) {
        if i == 0 && !part.is_empty() && p != 0 {
            continue;
        }
        if p < prev_end {
            continue;
        }
        let end = p + part.len();
        if i == n_vars && end != s.len() {
            continue;
        }

        let mut snapshot = None;
        if i > 0 {
            let var_name = &var_names[i - 1];
            let value: String = s[prev_end..p].iter().collect();
            match bindings.get(var_name) {
                Some(existing) if *existing != value => continue,
                Some(_) => {}
                None => {
                    snapshot = Some(bindings.clone());
                    bindings.insert(var_name.clone(), value);
                }
            }
        }

        if i == n_vars {
            return true;
        }

        if dfs(i + 1, end, s, fixed, var_names, suffix_len, bindings) {
            return true;
        }

        if let Some(snapshot) = snapshot {
            *bindings = snapshot;
        }
    }

    false
}

/// Reconstructs `template` with `bindings` substituted in, for property
/// tests verifying substitution reproduces the original string (P2).
pub fn substitute(template: &str, bindings: &HashMap<String, String>) -> String {
    let parsed = Template::parse(template);
    let mut out = String::new();
    for (idx, part) in parsed.fixed_parts.iter().enumerate() {
        out.push_str(part);
        if idx < parsed.var_names.len() {
            if let Some(value) = bindings.get(&parsed.var_names[idx]) {
                out.push_str(value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_placeholders_matches_iff_equal() {
        assert_eq!(match_template("hello world", "hello world"), Some(HashMap::new()));
        assert_eq!(match_template("hello world", "hello there"), None);
    }

    #[test]
    fn single_placeholder_binds_remainder() {
        let bindings = match_template("Say hello to {{var_0}}", "Say hello to Dave").unwrap();
        assert_eq!(bindings.get("var_0").unwrap(), "Dave");
    }

    #[test]
    fn placeholder_may_bind_empty_string() {
        let bindings = match_template("prefix-{{var_0}}-suffix", "prefix--suffix").unwrap();
        assert_eq!(bindings.get("var_0").unwrap(), "");
    }

    #[test]
    fn repeated_placeholder_requires_consistent_binding() {
        let bindings = match_template("{{x}} and {{x}}", "Alice and Alice").unwrap();
        assert_eq!(bindings.get("x").unwrap(), "Alice");
        assert!(match_template("{{x}} and {{x}}", "Alice and Bob").is_none());
    }

    #[test]
    fn non_greedy_except_final_placeholder() {
        // Two adjacent variable regions separated by a fixed anchor: the
        // first binds as little as possible, the last takes the remainder.
        let bindings =
            match_template("User {{var_0}} has email {{var_1}}", "User Alice has email a@x.com")
                .unwrap();
        assert_eq!(bindings.get("var_0").unwrap(), "Alice");
        assert_eq!(bindings.get("var_1").unwrap(), "a@x.com");
    }

    #[test]
    fn newline_matches_dot_all() {
        let bindings =
            match_template("before\n{{var_0}}\nafter", "before\nmiddle\ntext\nafter").unwrap();
        assert_eq!(bindings.get("var_0").unwrap(), "middle\ntext");
    }

    #[test]
    fn substitution_round_trips_match() {
        let template = "Greet user {{var_0}} politely.";
        let s = "Greet user Eve politely.";
        let bindings = match_template(template, s).unwrap();
        assert_eq!(substitute(template, &bindings), s);
    }

    #[test]
    fn whitespace_inside_braces_is_trimmed() {
        let bindings = match_template("hi {{ name }}", "hi Sam").unwrap();
        assert_eq!(bindings.get("name").unwrap(), "Sam");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // P2: whenever a match succeeds, substituting the bindings back
        // into the template reproduces the input exactly, for arbitrary
        // templates and strings (including `{{`/`}}` placeholder syntax).
        #[test]
        fn prop_successful_match_round_trips(
            template in "[a-zA-Z0-9{}_ ]{0,24}",
            s in "[a-zA-Z0-9{}_ ]{0,24}",
        ) {
            if let Some(bindings) = match_template(&template, &s) {
                prop_assert_eq!(substitute(&template, &bindings), s);
            }
        }

        // P1/P3: a single placeholder bridging two disjoint-alphabet fixed
        // parts always binds to exactly the value that was substituted in,
        // and repeated occurrences of the same name stay consistent.
        #[test]
        fn prop_single_placeholder_extracts_known_value(
            prefix in "[a-zA-Z]{1,8}",
            suffix in "[a-zA-Z]{1,8}",
            value in "[0-9]{0,8}",
        ) {
            let template = format!("{prefix}{{{{var_0}}}}{suffix}");
            let s = format!("{prefix}{value}{suffix}");
            let bindings = match_template(&template, &s).expect("must match");
            prop_assert_eq!(bindings.get("var_0").unwrap(), &value);
            prop_assert_eq!(substitute(&template, &bindings), s);
        }
    }
}
