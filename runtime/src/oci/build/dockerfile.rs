//! Dockerfile parser.
//!
//! Parses a Dockerfile into a sequence of build instructions.
//! Supports line continuations (`\`), comments, heredoc sources for COPY,
//! and both shell and JSON (exec) forms for COPY arguments. Instructions
//! this crate does not execute are kept as [`Instruction::Other`] so the
//! file still validates.

use std::path::Path;

use strata_core::error::{Result, StrataError};

/// Keywords that are valid but carry no structure we need.
const PASSTHROUGH_KEYWORDS: &[&str] = &[
    "RUN",
    "CMD",
    "ENTRYPOINT",
    "LABEL",
    "EXPOSE",
    "ADD",
    "VOLUME",
    "SHELL",
    "STOPSIGNAL",
    "HEALTHCHECK",
    "ONBUILD",
    "MAINTAINER",
];

/// One source of a COPY instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct CopySource {
    /// Source pattern, or the heredoc delimiter for inline sources
    pub path: String,
    /// Inline content for heredoc sources
    pub content: Option<String>,
}

impl CopySource {
    /// A source resolved against the file context.
    pub fn pattern(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    /// An inline heredoc source.
    pub fn heredoc(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: name.into(),
            content: Some(content.into()),
        }
    }

    pub fn is_heredoc(&self) -> bool {
        self.content.is_some()
    }
}

/// `COPY [--from=<stage>] [--chown=<user:group>] [--chmod=<mode>] <src>... <dst>`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CopyInstruction {
    /// Declared sources in order
    pub sources: Vec<CopySource>,
    /// Destination pattern
    pub dest: String,
    /// Earlier build stage used as the source root
    pub from: Option<String>,
    /// `--chown` value
    pub chown: Option<String>,
    /// `--chmod` value
    pub chmod: Option<String>,
}

impl CopyInstruction {
    /// Sources that are resolved against the file context.
    pub fn pattern_sources(&self) -> impl Iterator<Item = &CopySource> {
        self.sources.iter().filter(|s| !s.is_heredoc())
    }

    /// Inline heredoc sources.
    pub fn heredoc_sources(&self) -> impl Iterator<Item = &CopySource> {
        self.sources.iter().filter(|s| s.is_heredoc())
    }
}

impl std::fmt::Display for CopyInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "COPY")?;
        if let Some(from) = &self.from {
            write!(f, " --from={}", from)?;
        }
        if let Some(chown) = &self.chown {
            write!(f, " --chown={}", chown)?;
        }
        if let Some(chmod) = &self.chmod {
            write!(f, " --chmod={}", chmod)?;
        }
        for source in &self.sources {
            if source.is_heredoc() {
                write!(f, " <<{}", source.path)?;
            } else {
                write!(f, " {}", source.path)?;
            }
        }
        write!(f, " {}", self.dest)
    }
}

/// A single Dockerfile instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `FROM <image> [AS <alias>]`
    From {
        image: String,
        alias: Option<String>,
    },
    /// `ARG <name>[=<default>]`
    Arg {
        name: String,
        default: Option<String>,
    },
    /// `COPY ...`
    Copy(CopyInstruction),
    /// `WORKDIR <path>`
    Workdir { path: String },
    /// `ENV <key>=<value>` or `ENV <key> <value>`
    Env { key: String, value: String },
    /// `USER <user>[:<group>]`
    User { user: String },
    /// Any other valid instruction, kept verbatim
    Other { keyword: String, args: String },
}

/// Parsed Dockerfile: a list of instructions in order.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    pub instructions: Vec<Instruction>,
}

impl Dockerfile {
    /// Parse a Dockerfile from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let lines: Vec<&str> = content.lines().collect();
        let mut instructions = Vec::new();
        let mut idx = 0;

        while let Some((line_num, line)) = next_logical_line(&lines, &mut idx) {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let instruction = parse_instruction(trimmed, line_num, &lines, &mut idx)?;
            instructions.push(instruction);
        }

        if instructions.is_empty() {
            return Err(StrataError::Parse(
                "Dockerfile is empty or contains no instructions".to_string(),
            ));
        }

        // Validate: first non-ARG instruction must be FROM
        let first_non_arg = instructions
            .iter()
            .find(|i| !matches!(i, Instruction::Arg { .. }));
        if !matches!(first_non_arg, Some(Instruction::From { .. })) {
            return Err(StrataError::Parse(
                "First instruction must be FROM (or ARG before FROM)".to_string(),
            ));
        }

        Ok(Dockerfile { instructions })
    }

    /// Parse a Dockerfile from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrataError::NotFound(format!("Dockerfile at {}", path.display()))
            } else {
                StrataError::Parse(format!(
                    "Failed to read Dockerfile at {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;
        Self::parse(&content)
    }
}

/// Read the next logical line starting at `idx`, joining lines ending with `\`.
///
/// Returns the 1-based number of the first physical line and the joined text.
fn next_logical_line(lines: &[&str], idx: &mut usize) -> Option<(usize, String)> {
    if *idx >= lines.len() {
        return None;
    }

    let line_num = *idx + 1;
    let mut current = String::new();

    while *idx < lines.len() {
        let line = lines[*idx];
        *idx += 1;

        // Comment lines inside a continuation are dropped
        if !current.is_empty() && line.trim_start().starts_with('#') {
            continue;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            return Some((line_num, current));
        }
    }

    // Handle trailing continuation without final line
    Some((line_num, current))
}

/// Parse a single logical line into an Instruction.
fn parse_instruction(
    line: &str,
    line_num: usize,
    lines: &[&str],
    idx: &mut usize,
) -> Result<Instruction> {
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_uppercase();

    match keyword_upper.as_str() {
        "FROM" => parse_from(rest, line_num),
        "ARG" => parse_arg(rest, line_num),
        "COPY" => parse_copy(rest, line_num, lines, idx),
        "WORKDIR" => parse_workdir(rest, line_num),
        "ENV" => parse_env(rest, line_num),
        "USER" => parse_user(rest, line_num),
        k if PASSTHROUGH_KEYWORDS.contains(&k) => {
            // RUN may carry heredocs too; their bodies are not instructions
            for delimiter in heredoc_delimiters(rest) {
                read_heredoc_body(&delimiter, lines, idx, line_num)?;
            }
            Ok(Instruction::Other {
                keyword: keyword_upper,
                args: rest.to_string(),
            })
        }
        _ => Err(StrataError::Parse(format!(
            "Line {}: Unknown instruction '{}'",
            line_num, keyword
        ))),
    }
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize) -> Result<Instruction> {
    // Flags such as --platform do not affect the image reference
    let mut rest = rest;
    while rest.starts_with("--") {
        rest = split_first_word(rest).1;
    }

    if rest.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: FROM requires an image argument",
            line_num
        )));
    }

    let parts: Vec<&str> = rest.split_whitespace().collect();
    match parts.as_slice() {
        [image] => Ok(Instruction::From {
            image: image.to_string(),
            alias: None,
        }),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("AS") => Ok(Instruction::From {
            image: image.to_string(),
            alias: Some(alias.to_string()),
        }),
        _ => Err(StrataError::Parse(format!(
            "Line {}: FROM requires either one or three arguments",
            line_num
        ))),
    }
}

fn parse_copy(
    rest: &str,
    line_num: usize,
    lines: &[&str],
    idx: &mut usize,
) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: COPY requires source and destination",
            line_num
        )));
    }

    let mut copy = CopyInstruction::default();
    let mut remaining = rest;

    while remaining.starts_with("--") {
        let (flag, after) = split_first_word(remaining);
        let (name, value) = flag.split_once('=').unwrap_or((flag, ""));
        match name {
            "--from" => copy.from = Some(non_empty_flag(name, value, line_num)?),
            "--chown" => copy.chown = Some(non_empty_flag(name, value, line_num)?),
            "--chmod" => copy.chmod = Some(non_empty_flag(name, value, line_num)?),
            "--link" => {}
            _ => {
                return Err(StrataError::Parse(format!(
                    "Line {}: Unknown flag for COPY: {}",
                    line_num, flag
                )))
            }
        }
        remaining = after;
    }

    let parts: Vec<String> = if remaining.starts_with('[') {
        parse_json_array(remaining, line_num)?
    } else {
        remaining.split_whitespace().map(|s| s.to_string()).collect()
    };

    let Some((dest, sources)) = parts.split_last() else {
        return Err(StrataError::Parse(format!(
            "Line {}: COPY requires at least one source and a destination",
            line_num
        )));
    };
    if sources.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: COPY requires at least one source and a destination",
            line_num
        )));
    }

    for source in sources {
        match parse_heredoc_marker(source) {
            Some(delimiter) => {
                let body = read_heredoc_body(&delimiter, lines, idx, line_num)?;
                copy.sources.push(CopySource::heredoc(delimiter.name, body));
            }
            None => copy.sources.push(CopySource::pattern(source.clone())),
        }
    }
    copy.dest = dest.clone();

    Ok(Instruction::Copy(copy))
}

fn non_empty_flag(name: &str, value: &str, line_num: usize) -> Result<String> {
    if value.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: {} requires a value",
            line_num, name
        )));
    }
    Ok(value.to_string())
}

fn parse_workdir(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: WORKDIR requires a path",
            line_num
        )));
    }
    Ok(Instruction::Workdir {
        path: rest.to_string(),
    })
}

fn parse_env(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: ENV requires a key and value",
            line_num
        )));
    }

    // ENV KEY=VALUE when the first '=' precedes any whitespace
    if let Some(eq_pos) = rest.find('=') {
        let before_space = rest.find(char::is_whitespace).map_or(true, |sp| eq_pos < sp);
        if before_space {
            let key = rest[..eq_pos].to_string();
            let value = unquote(&rest[eq_pos + 1..]);
            return Ok(Instruction::Env { key, value });
        }
    }

    // Legacy form: ENV KEY VALUE
    let (key, value) = split_first_word(rest);
    Ok(Instruction::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_user(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: USER requires a username",
            line_num
        )));
    }
    Ok(Instruction::User {
        user: rest.split_whitespace().next().unwrap_or(rest).to_string(),
    })
}

fn parse_arg(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(StrataError::Parse(format!(
            "Line {}: ARG requires a name",
            line_num
        )));
    }

    if let Some(eq_pos) = rest.find('=') {
        let name = rest[..eq_pos].trim().to_string();
        let default = Some(unquote(&rest[eq_pos + 1..]));
        Ok(Instruction::Arg { name, default })
    } else {
        Ok(Instruction::Arg {
            name: rest.trim().to_string(),
            default: None,
        })
    }
}

// --- Heredocs ---

/// A `<<NAME`, `<<-NAME` or `<<"NAME"` marker.
#[derive(Debug, Clone, PartialEq)]
struct HeredocDelimiter {
    name: String,
    strip_tabs: bool,
}

fn parse_heredoc_marker(word: &str) -> Option<HeredocDelimiter> {
    let rest = word.strip_prefix("<<")?;
    let (strip_tabs, rest) = match rest.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let name = unquote(rest);
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(HeredocDelimiter { name, strip_tabs })
}

fn heredoc_delimiters(args: &str) -> Vec<HeredocDelimiter> {
    args.split_whitespace()
        .filter_map(parse_heredoc_marker)
        .collect()
}

/// Consume physical lines up to the terminator and return the body.
fn read_heredoc_body(
    delimiter: &HeredocDelimiter,
    lines: &[&str],
    idx: &mut usize,
    line_num: usize,
) -> Result<String> {
    let mut body = String::new();
    while *idx < lines.len() {
        let raw = lines[*idx];
        *idx += 1;
        let line = if delimiter.strip_tabs {
            raw.trim_start_matches('\t')
        } else {
            raw
        };
        if line.trim_end() == delimiter.name {
            return Ok(body);
        }
        body.push_str(line);
        body.push('\n');
    }
    Err(StrataError::Parse(format!(
        "Line {}: unterminated heredoc, expected '{}'",
        line_num, delimiter.name
    )))
}

// --- Helpers ---

/// Parse a JSON array string like `["a", "b", "c"]` into a Vec<String>.
fn parse_json_array(s: &str, line_num: usize) -> Result<Vec<String>> {
    let parsed: Vec<String> = serde_json::from_str(s).map_err(|e| {
        StrataError::Parse(format!(
            "Line {}: Invalid JSON array '{}': {}",
            line_num, s, e
        ))
    })?;
    Ok(parsed)
}

/// Remove surrounding quotes from a string.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_copy_line(rest: &str) -> Result<Instruction> {
        let mut idx = 0;
        parse_copy(rest, 1, &[], &mut idx)
    }

    // --- next_logical_line ---

    #[test]
    fn test_join_continuation_simple() {
        let lines = vec!["RUN apt-get update && \\", "    apt-get install -y curl"];
        let mut idx = 0;
        let (num, line) = next_logical_line(&lines, &mut idx).unwrap();
        assert_eq!(num, 1);
        assert!(line.contains("apt-get update"));
        assert!(line.contains("apt-get install"));
        assert!(next_logical_line(&lines, &mut idx).is_none());
    }

    #[test]
    fn test_join_continuation_skips_inner_comments() {
        let lines = vec!["COPY a \\", "# note", "  /dst/"];
        let mut idx = 0;
        let (_, line) = next_logical_line(&lines, &mut idx).unwrap();
        assert_eq!(line.split_whitespace().collect::<Vec<_>>(), ["COPY", "a", "/dst/"]);
    }

    // --- FROM ---

    #[test]
    fn test_parse_from_simple() {
        assert_eq!(
            parse_from("alpine:3.19", 1).unwrap(),
            Instruction::From {
                image: "alpine:3.19".to_string(),
                alias: None,
            }
        );
    }

    #[test]
    fn test_parse_from_with_alias() {
        assert_eq!(
            parse_from("golang:1.21 as builder", 1).unwrap(),
            Instruction::From {
                image: "golang:1.21".to_string(),
                alias: Some("builder".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_from_platform_flag() {
        assert_eq!(
            parse_from("--platform=linux/amd64 alpine AS base", 1).unwrap(),
            Instruction::From {
                image: "alpine".to_string(),
                alias: Some("base".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_from_invalid() {
        assert!(parse_from("", 1).is_err());
        assert!(parse_from("alpine extra", 1).is_err());
    }

    // --- COPY ---

    #[test]
    fn test_parse_copy_simple() {
        let result = parse_copy_line("app.py /workspace/").unwrap();
        assert_eq!(
            result,
            Instruction::Copy(CopyInstruction {
                sources: vec![CopySource::pattern("app.py")],
                dest: "/workspace/".to_string(),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_parse_copy_flags() {
        let result =
            parse_copy_line("--from=builder --chown=app:app --chmod=0755 /app/bin /usr/local/bin/")
                .unwrap();
        assert_eq!(
            result,
            Instruction::Copy(CopyInstruction {
                sources: vec![CopySource::pattern("/app/bin")],
                dest: "/usr/local/bin/".to_string(),
                from: Some("builder".to_string()),
                chown: Some("app:app".to_string()),
                chmod: Some("0755".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_copy_json_form() {
        let result = parse_copy_line(r#"["my file.txt", "other.txt", "/dest/"]"#).unwrap();
        let Instruction::Copy(copy) = result else {
            panic!("Expected COPY instruction");
        };
        assert_eq!(copy.sources.len(), 2);
        assert_eq!(copy.sources[0].path, "my file.txt");
        assert_eq!(copy.dest, "/dest/");
    }

    #[test]
    fn test_parse_copy_errors() {
        assert!(parse_copy_line("").is_err());
        assert!(parse_copy_line("onlysource").is_err());
        assert!(parse_copy_line("--from= a b").is_err());
        assert!(parse_copy_line("--bogus=1 a b").is_err());
    }

    #[test]
    fn test_parse_copy_heredoc() {
        let content = "FROM alpine\nCOPY <<EOF /etc/motd\nhello\n  world\nEOF\nUSER nobody\n";
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(df.instructions.len(), 3);
        let Instruction::Copy(copy) = &df.instructions[1] else {
            panic!("Expected COPY instruction");
        };
        assert_eq!(copy.sources, vec![CopySource::heredoc("EOF", "hello\n  world\n")]);
        assert_eq!(copy.dest, "/etc/motd");
        assert!(matches!(&df.instructions[2], Instruction::User { user } if user == "nobody"));
    }

    #[test]
    fn test_parse_copy_heredoc_strip_tabs() {
        let content = "FROM alpine\nCOPY <<-END /x\n\tindented\n\tEND\n";
        let df = Dockerfile::parse(content).unwrap();
        let Instruction::Copy(copy) = &df.instructions[1] else {
            panic!("Expected COPY instruction");
        };
        assert_eq!(copy.sources[0].content.as_deref(), Some("indented\n"));
    }

    #[test]
    fn test_parse_copy_heredoc_unterminated() {
        let content = "FROM alpine\nCOPY <<EOF /x\nno end";
        assert!(matches!(
            Dockerfile::parse(content),
            Err(StrataError::Parse(_))
        ));
    }

    #[test]
    fn test_copy_display() {
        let copy = CopyInstruction {
            sources: vec![CopySource::pattern("a"), CopySource::heredoc("EOF", "x")],
            dest: "/d/".to_string(),
            from: Some("builder".to_string()),
            chown: None,
            chmod: Some("644".to_string()),
        };
        assert_eq!(copy.to_string(), "COPY --from=builder --chmod=644 a <<EOF /d/");
    }

    // --- ENV / ARG / USER ---

    #[test]
    fn test_parse_env_forms() {
        assert_eq!(
            parse_env(r#"MSG="hello world""#, 1).unwrap(),
            Instruction::Env {
                key: "MSG".to_string(),
                value: "hello world".to_string(),
            }
        );
        assert_eq!(
            parse_env("MY_VAR my_value", 1).unwrap(),
            Instruction::Env {
                key: "MY_VAR".to_string(),
                value: "my_value".to_string(),
            }
        );
        assert!(parse_env("", 1).is_err());
    }

    #[test]
    fn test_parse_arg() {
        assert_eq!(
            parse_arg("VERSION", 1).unwrap(),
            Instruction::Arg {
                name: "VERSION".to_string(),
                default: None,
            }
        );
        assert_eq!(
            parse_arg("VERSION=1.0.0", 1).unwrap(),
            Instruction::Arg {
                name: "VERSION".to_string(),
                default: Some("1.0.0".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_user_with_group() {
        assert_eq!(
            parse_user("1000:1000", 1).unwrap(),
            Instruction::User {
                user: "1000:1000".to_string(),
            }
        );
    }

    // --- Full Dockerfile parsing ---

    #[test]
    fn test_parse_multi_stage() {
        let content = r#"
# Build stage
FROM golang:1.20 AS builder
WORKDIR /src
COPY . .
RUN go build -o /out/app ./cmd/app

FROM alpine:latest
LABEL maintainer="team@example.com"
COPY --from=builder /out/app /usr/local/bin/app
ENTRYPOINT ["/usr/local/bin/app"]
"#;
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(df.instructions.len(), 8);
        assert!(matches!(
            &df.instructions[6],
            Instruction::Copy(c) if c.from.as_deref() == Some("builder")
        ));
        assert!(matches!(
            &df.instructions[7],
            Instruction::Other { keyword, .. } if keyword == "ENTRYPOINT"
        ));
    }

    #[test]
    fn test_parse_run_heredoc_is_skipped() {
        let content = "FROM alpine\nRUN <<EOT\nFROM not-an-image\nEOT\n";
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(df.instructions.len(), 2);
    }

    #[test]
    fn test_parse_empty_dockerfile() {
        assert!(Dockerfile::parse("# just a comment\n\n").is_err());
    }

    #[test]
    fn test_parse_no_from() {
        assert!(Dockerfile::parse("LABEL a=b").is_err());
    }

    #[test]
    fn test_parse_invalid_text() {
        let err = Dockerfile::parse("This is a invalid dockerfile").unwrap_err();
        assert!(matches!(err, StrataError::Parse(_)));
        assert!(err.to_string().contains("Unknown instruction 'This'"));
    }

    #[test]
    fn test_parse_arg_before_from() {
        let df = Dockerfile::parse("ARG VERSION=3.19\nFROM alpine:${VERSION}").unwrap();
        assert_eq!(df.instructions.len(), 2);
        assert!(matches!(&df.instructions[0], Instruction::Arg { .. }));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Dockerfile::from_file(Path::new("/nonexistent/Dockerfile")).unwrap_err();
        assert!(matches!(err, StrataError::NotFound(_)));
    }

    // --- unquote ---

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""hello world""#), "hello world");
        assert_eq!(unquote("'hello world'"), "hello world");
        assert_eq!(unquote("hello"), "hello");
        assert_eq!(unquote(r#""hello'"#), r#""hello'"#);
        assert_eq!(unquote("\""), "\"");
    }
}
