/// Expand `{{ env.VAR }}` placeholders in a raw YAML document
///
/// An optional fallback is written `{{ env.VAR | default("value") }}` and
/// is used when the variable is unset. Expansion runs on the raw text
/// before deserialization so config structs stay plain `String` and
/// `SecretString`. YAML comment lines pass through untouched, which lets
/// operators keep commented-out placeholders for variables they have not
/// exported.
pub fn expand_env(raw: &str) -> Result<String, String> {
    let mut expanded = String::with_capacity(raw.len());

    for (index, line) in raw.lines().enumerate() {
        if index > 0 {
            expanded.push('\n');
        }

        if line.trim_start().starts_with('#') {
            expanded.push_str(line);
        } else {
            expand_line(line, &mut expanded)?;
        }
    }

    if raw.ends_with('\n') {
        expanded.push('\n');
    }

    Ok(expanded)
}

/// Expand every placeholder on one line, appending to `out`
fn expand_line(line: &str, out: &mut String) -> Result<(), String> {
    let mut rest = line;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let inner = &rest[open + 2..];

        let Some(close) = inner.find("}}") else {
            return Err(format!("unterminated placeholder on line: `{}`", line.trim()));
        };

        out.push_str(&resolve_placeholder(&inner[..close])?);
        rest = &inner[close + 2..];
    }

    out.push_str(rest);
    Ok(())
}

/// Resolve the text between `{{` and `}}` to its replacement value
fn resolve_placeholder(body: &str) -> Result<String, String> {
    let (variable, fallback) = match body.split_once('|') {
        Some((variable, clause)) => (variable.trim(), Some(parse_default_clause(clause)?)),
        None => (body.trim(), None),
    };

    let Some(name) = variable.strip_prefix("env.") else {
        return Err(format!("unsupported placeholder `{variable}`: only env.* values can be expanded"));
    };

    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(format!("invalid environment variable name `{name}`"));
    }

    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => fallback.ok_or_else(|| format!("environment variable `{name}` is not set")),
    }
}

/// Parse the `default("...")` clause after the pipe
fn parse_default_clause(clause: &str) -> Result<String, String> {
    clause
        .trim()
        .strip_prefix("default(\"")
        .and_then(|tail| tail.strip_suffix("\")"))
        .map(ToOwned::to_owned)
        .ok_or_else(|| format!("malformed default clause `{}`, expected default(\"value\")", clause.trim()))
}
