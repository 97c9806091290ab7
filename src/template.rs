//! Design template materialization.
//!
//! Two ways of turning a template into a run's design file:
//! - named placeholders (`{numVolumes}`), filled from a `ParameterSet`;
//! - pattern rules that rewrite the value of an existing `set <key> ...` line.
//!
//! Both fail loudly: a missing parameter or a rule that matches nothing is an error,
//! and nothing is written to disk until the whole document rendered.

use crate::error::TemplateError;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Path(PathBuf),
    Int(u64),
    /// Rendered with six decimals, the precision FEAT writes for TR.
    Float(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Path(p) => write!(f, "{}", p.display()),
            ParamValue::Int(n) => write!(f, "{n}"),
            ParamValue::Float(x) => write!(f, "{x:.6}"),
        }
    }
}

impl From<PathBuf> for ParamValue {
    fn from(p: PathBuf) -> Self {
        ParamValue::Path(p)
    }
}

impl From<u32> for ParamValue {
    fn from(n: u32) -> Self {
        ParamValue::Int(n.into())
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

/// Parameter name to value, built fresh for each run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }
}

enum Segment<'a> {
    Text(&'a str),
    Field(&'a str),
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a template into literal text and `{name}` fields. `{{` and `}}` are
/// literal braces.
fn segments(text: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                out.push(Segment::Text(&text[start..=i]));
                i += 2;
                start = i;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                out.push(Segment::Text(&text[start..=i]));
                i += 2;
                start = i;
            }
            b'{' => {
                let close = text[i + 1..]
                    .find('}')
                    .map(|off| i + 1 + off)
                    .ok_or(TemplateError::Malformed {
                        offset: i,
                        reason: "unclosed placeholder",
                    })?;
                let name = &text[i + 1..close];
                if !is_placeholder_name(name) {
                    return Err(TemplateError::Malformed {
                        offset: i,
                        reason: "invalid placeholder name",
                    });
                }
                out.push(Segment::Text(&text[start..i]));
                out.push(Segment::Field(name));
                i = close + 1;
                start = i;
            }
            b'}' => {
                return Err(TemplateError::Malformed {
                    offset: i,
                    reason: "single '}' outside a placeholder",
                })
            }
            _ => i += 1,
        }
    }
    out.push(Segment::Text(&text[start..]));
    Ok(out)
}

/// A design template loaded once per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDocument {
    text: String,
}

impl TemplateDocument {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(text))
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names of every placeholder in the template.
    pub fn placeholders(&self) -> Result<BTreeSet<String>, TemplateError> {
        Ok(segments(&self.text)?
            .into_iter()
            .filter_map(|s| match s {
                Segment::Field(name) => Some(name.to_string()),
                Segment::Text(_) => None,
            })
            .collect())
    }

    /// Fill every placeholder from `params`. All missing names are reported at once.
    pub fn render_named(&self, params: &ParameterSet) -> Result<String, TemplateError> {
        let segs = segments(&self.text)?;

        let missing: BTreeSet<&str> = segs
            .iter()
            .filter_map(|s| match s {
                Segment::Field(name) if params.get(name).is_none() => Some(*name),
                _ => None,
            })
            .collect();
        if !missing.is_empty() {
            return Err(TemplateError::MissingParameter {
                names: missing.into_iter().map(str::to_string).collect(),
            });
        }

        let mut out = String::with_capacity(self.text.len());
        for s in segs {
            match s {
                Segment::Text(t) => out.push_str(t),
                Segment::Field(name) => {
                    if let Some(v) = params.get(name) {
                        out.push_str(&v.to_string());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Apply pattern rules in order. Every rule must match.
    pub fn rewrite(&self, rules: &[PatternRule]) -> Result<TemplateDocument, TemplateError> {
        let mut text = self.text.clone();
        for rule in rules {
            text = rule.apply(&text)?;
        }
        Ok(TemplateDocument { text })
    }
}

/// Replace the value that follows a fixed prefix, e.g. the quoted path after
/// `set fmri(outputdir) `. Capture group 1 is the kept prefix.
#[derive(Debug, Clone)]
pub struct PatternRule {
    label: String,
    regex: Regex,
    value: String,
    closing: &'static str,
}

impl PatternRule {
    /// `set <key> "<value>"`
    pub fn quoted(key: &str, value: impl fmt::Display) -> Result<Self, TemplateError> {
        let pattern = format!(r#"(?m)^(\s*set {} ")[^"\n]*""#, regex::escape(key));
        Self::build(format!("set {key}"), &pattern, value.to_string(), "\"")
    }

    /// `set <key> <value>` up to the end of the line.
    pub fn bare(key: &str, value: impl fmt::Display) -> Result<Self, TemplateError> {
        let pattern = format!(r"(?m)^(\s*set {} )[^\r\n]*", regex::escape(key));
        Self::build(format!("set {key}"), &pattern, value.to_string(), "")
    }

    /// Arbitrary legacy rule: everything the regex matches after group 1 becomes `value`.
    #[cfg(test)]
    pub fn new(pattern: &str, value: impl fmt::Display) -> Result<Self, TemplateError> {
        Self::build(pattern.to_string(), pattern, value.to_string(), "")
    }

    fn build(
        label: String,
        pattern: &str,
        value: String,
        closing: &'static str,
    ) -> Result<Self, TemplateError> {
        let regex = Regex::new(pattern).map_err(|source| TemplateError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            label,
            regex,
            value,
            closing,
        })
    }

    pub fn apply(&self, text: &str) -> Result<String, TemplateError> {
        if !self.regex.is_match(text) {
            return Err(TemplateError::PatternNotMatched {
                rule: self.label.clone(),
            });
        }
        let replaced = self.regex.replace_all(text, |caps: &Captures<'_>| {
            let prefix = caps.get(1).map_or("", |m| m.as_str());
            format!("{}{}{}", prefix, self.value, self.closing)
        });
        Ok(replaced.into_owned())
    }

    /// Current value at the first match, without prefix or closing quote.
    #[cfg(test)]
    pub fn extract(&self, text: &str) -> Option<String> {
        let caps = self.regex.captures(text)?;
        let whole = caps.get(0)?.as_str();
        let prefix_len = caps.get(1).map_or(0, |m| m.as_str().len());
        whole
            .get(prefix_len..whole.len() - self.closing.len())
            .map(str::to_string)
    }
}

/// Write a design file so that readers never see a partial file: temp file in the
/// same directory, fsync, rename over the target.
pub fn write_config_atomic(path: &Path, contents: &str) -> Result<(), TemplateError> {
    let write_err = |source: std::io::Error| TemplateError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    // NamedTempFile creates 0600; match what a plain create gives.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(write_err)?;
    }
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSF: &str = "\
# FEAT version number
set fmri(version) 6.00
set fmri(outputdir) \"/old/out.feat\"
set feat_files(1) \"/old/input\"
set fmri(tr) 3.000000
set fmri(npts) 180
set highres_files(1) \"/old/struct\"
";

    fn params(pairs: &[(&str, &str)]) -> ParameterSet {
        let mut p = ParameterSet::new();
        for (k, v) in pairs {
            p.insert(*k, *v);
        }
        p
    }

    #[test]
    fn renders_named_placeholders() {
        let t = TemplateDocument::from_text(
            "set fmri(npts) {numVolumes}\nset feat_files(1) \"{input_feat_file}\"\n",
        );
        let mut p = ParameterSet::new();
        p.insert("numVolumes", 120u32);
        p.insert("input_feat_file", PathBuf::from("/d/run05/denoised.nii.gz"));
        assert_eq!(
            t.render_named(&p).unwrap(),
            "set fmri(npts) 120\nset feat_files(1) \"/d/run05/denoised.nii.gz\"\n"
        );
    }

    #[test]
    fn missing_parameters_are_all_reported() {
        let t = TemplateDocument::from_text("{a} {b} {c} {a}");
        let err = t.render_named(&params(&[("b", "x")])).unwrap_err();
        match err {
            TemplateError::MissingParameter { names } => assert_eq!(names, vec!["a", "c"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn extra_parameters_are_ignored() {
        let t = TemplateDocument::from_text("x={x}");
        assert_eq!(
            t.render_named(&params(&[("x", "1"), ("unused", "2")])).unwrap(),
            "x=1"
        );
    }

    #[test]
    fn doubled_braces_are_literal() {
        let t = TemplateDocument::from_text("{{literal}} {v}}}");
        assert_eq!(t.render_named(&params(&[("v", "7")])).unwrap(), "{literal} 7}");
    }

    #[test]
    fn malformed_braces_are_rejected() {
        for bad in ["open {never", "stray } brace", "{bad name}", "{}"] {
            let t = TemplateDocument::from_text(bad);
            assert!(
                matches!(
                    t.render_named(&ParameterSet::new()),
                    Err(TemplateError::Malformed { .. })
                ),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn render_is_idempotent() {
        let t = TemplateDocument::from_text("a={a}\nb={b}\n");
        let p = params(&[("a", "1"), ("b", "/x/y")]);
        assert_eq!(t.render_named(&p).unwrap(), t.render_named(&p).unwrap());
    }

    #[test]
    fn placeholders_lists_unique_names() {
        let t = TemplateDocument::from_text("{b} {a} {b} {{c}}");
        let names: Vec<_> = t.placeholders().unwrap().into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn quoted_rule_replaces_only_the_value() {
        let rule = PatternRule::quoted("fmri(outputdir)", "/new/run05/05-preprocess.feat").unwrap();
        let out = rule.apply(FSF).unwrap();
        assert!(out.contains("set fmri(outputdir) \"/new/run05/05-preprocess.feat\"\n"));
        assert_eq!(
            rule.extract(&out).as_deref(),
            Some("/new/run05/05-preprocess.feat")
        );
        // every other line is untouched
        let other: Vec<_> = out.lines().filter(|l| !l.contains("outputdir")).collect();
        let orig: Vec<_> = FSF.lines().filter(|l| !l.contains("outputdir")).collect();
        assert_eq!(other, orig);
    }

    #[test]
    fn bare_rule_round_trips() {
        let rule = PatternRule::bare("fmri(tr)", format!("{:.6}", 2.0)).unwrap();
        let out = rule.apply(FSF).unwrap();
        assert_eq!(rule.extract(&out).as_deref(), Some("2.000000"));
        assert!(out.contains("set fmri(npts) 180\n"));
    }

    #[test]
    fn replacement_is_literal() {
        let rule = PatternRule::quoted("feat_files(1)", "/data/$1/${x}").unwrap();
        let out = rule.apply(FSF).unwrap();
        assert!(out.contains("set feat_files(1) \"/data/$1/${x}\""));
    }

    #[test]
    fn unmatched_rule_is_an_error() {
        let rule = PatternRule::bare("fmri(st_file)", "/x").unwrap();
        let err = rule.apply(FSF).unwrap_err();
        assert!(matches!(err, TemplateError::PatternNotMatched { .. }));
    }

    #[test]
    fn legacy_rule_uses_group_one_as_prefix() {
        let rule = PatternRule::new(r"(set fmri\(npts\) ).*", 240).unwrap();
        let out = rule.apply(FSF).unwrap();
        assert!(out.contains("set fmri(npts) 240\n"));
        assert!(matches!(
            PatternRule::new("(unclosed", "x"),
            Err(TemplateError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn rewrite_applies_rules_in_order() {
        let doc = TemplateDocument::from_text(FSF);
        let rules = vec![
            PatternRule::bare("fmri(npts)", 120).unwrap(),
            PatternRule::quoted("highres_files(1)", "/pd/final_structural").unwrap(),
        ];
        let out = doc.rewrite(&rules).unwrap();
        assert!(out.text().contains("set fmri(npts) 120\n"));
        assert!(out.text().contains("set highres_files(1) \"/pd/final_structural\"\n"));
        // the source document is unchanged
        assert_eq!(doc.text(), FSF);
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("block05_design.fsf");
        std::fs::write(&path, "old").unwrap();
        write_config_atomic(&path, "new contents\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new contents\n");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn atomic_write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("x.fsf");
        assert!(matches!(
            write_config_atomic(&path, "x"),
            Err(TemplateError::Write { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn written_config_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("block05_design.fsf");
        write_config_atomic(&path, "set fmri(npts) 120\n").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
