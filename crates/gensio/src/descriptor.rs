//! Stack descriptor parsing.
//!
//! A descriptor lists stages outermost first and ends with exactly one
//! transport, whose trailing comma-separated tokens are positional
//! parameters:
//!
//! ```text
//! ssl(key=key.pem,cert=cert.pem,clientauth),mux(chunksize=64),sctp,localhost,3023
//! ```
//!
//! Commas inside parentheses never split stages, and parameter values may
//! themselves contain balanced parentheses.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::registry::{StageDriver, StageRegistry};

/// Which side of a connection a stack is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Actively establishing an outbound connection.
    Connect,
    /// Producing connections for inbound peers.
    Accept,
}

/// Whether a stage is the base transport or a filter stacked on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageClass {
    /// The base of the stack; carries host and port arguments.
    Transport,
    /// A stage wrapping the one below it.
    Filter,
}

/// One parsed stage: its kind name, keyed parameters and positional args.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Registered driver name, e.g. `tcp` or `ssl`.
    pub name: String,
    /// Transport or filter.
    pub class: StageClass,
    /// Keyed parameters. Flags such as `clientauth` map to an empty value.
    pub params: BTreeMap<String, String>,
    /// Positional parameters; only transports have them.
    pub args: Vec<String>,
}

impl StageSpec {
    /// A filter stage with no parameters.
    pub fn filter(name: &str) -> Self {
        Self {
            name: name.to_string(),
            class: StageClass::Filter,
            params: BTreeMap::new(),
            args: Vec::new(),
        }
    }

    /// A transport stage with no parameters.
    pub fn transport(name: &str) -> Self {
        Self {
            class: StageClass::Transport,
            ..Self::filter(name)
        }
    }

    /// Adds a keyed parameter; an empty value makes it a flag.
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Appends a positional parameter.
    pub fn with_arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// The raw value of a keyed parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// True when `key` was given, with or without a value.
    pub fn has_param(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Reads a boolean flag. A bare key counts as `true`.
    pub fn flag(&self, key: &str) -> Result<bool, ParseError> {
        match self.param(key) {
            None => Ok(false),
            Some("" | "true" | "yes" | "on" | "1") => Ok(true),
            Some("false" | "no" | "off" | "0") => Ok(false),
            Some(other) => Err(self.invalid(key, format!("'{}' is not a boolean", other))),
        }
    }

    /// Parses a keyed parameter into `T`, if present.
    pub fn parse_param<T>(&self, key: &str) -> Result<Option<T>, ParseError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.param(key)
            .map(|v| v.parse::<T>().map_err(|e| self.invalid(key, e.to_string())))
            .transpose()
    }

    /// Rejects any keyed parameter not in `allowed`.
    pub fn check_keys(&self, allowed: &[&str]) -> Result<(), ParseError> {
        match self.params.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(ParseError::UnknownParam {
                stage: self.name.clone(),
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }

    /// An [`ParseError::InvalidParam`] for this stage.
    pub fn invalid(&self, key: &str, reason: impl Into<String>) -> ParseError {
        ParseError::InvalidParam {
            stage: self.name.clone(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// A [`ParseError::MissingParam`] for this stage.
    pub fn missing(&self, what: &str) -> ParseError {
        ParseError::MissingParam {
            stage: self.name.clone(),
            what: what.to_string(),
        }
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.params.is_empty() {
            f.write_str("(")?;
            for (i, (key, value)) in self.params.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                if value.is_empty() {
                    write!(f, "{}", key)?;
                } else {
                    write!(f, "{}={}", key, value)?;
                }
            }
            f.write_str(")")?;
        }
        for arg in &self.args {
            write!(f, ",{}", arg)?;
        }
        Ok(())
    }
}

/// An ordered stage list, outermost first, transport last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSpec {
    stages: Vec<StageSpec>,
}

impl StackSpec {
    /// Parses against the built-in stage kinds without role-specific checks.
    pub fn parse(descriptor: &str) -> Result<Self, ParseError> {
        Self::parse_with(descriptor, &StageRegistry::with_builtins(), None)
    }

    /// Parses against `registry`, validating positional parameters for `role`.
    pub fn parse_with(
        descriptor: &str,
        registry: &StageRegistry,
        role: Option<Role>,
    ) -> Result<Self, ParseError> {
        if descriptor.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut stages = Vec::new();
        let mut tokens = split_top_level(descriptor, 0)?.into_iter();
        while let Some((pos, raw)) = tokens.next() {
            let (name, params) = parse_stage(pos, raw)?;
            let driver = registry
                .lookup(name)
                .ok_or_else(|| ParseError::UnknownStage(name.to_string()))?;

            match driver {
                StageDriver::Filter(filter) => {
                    let spec = StageSpec {
                        name: name.to_string(),
                        class: StageClass::Filter,
                        params,
                        args: Vec::new(),
                    };
                    filter.validate(&spec)?;
                    stages.push(spec);
                }
                StageDriver::Transport(transport) => {
                    let mut args = Vec::new();
                    for (apos, arg) in tokens.by_ref() {
                        if arg.is_empty() {
                            return Err(ParseError::EmptyStage { pos: apos });
                        }
                        if arg.contains(['(', ')']) {
                            return Err(ParseError::UnexpectedStage {
                                transport: name.to_string(),
                                token: arg.to_string(),
                            });
                        }
                        args.push(arg.to_string());
                    }
                    let spec = StageSpec {
                        name: name.to_string(),
                        class: StageClass::Transport,
                        params,
                        args,
                    };
                    transport.validate(&spec, role)?;
                    stages.push(spec);
                    return Ok(Self { stages });
                }
            }
        }

        Err(ParseError::MissingTransport)
    }

    /// Builds a stack from already-constructed stages.
    pub fn from_stages(stages: Vec<StageSpec>) -> Result<Self, ParseError> {
        match stages.split_last() {
            None => Err(ParseError::Empty),
            Some((last, rest)) => {
                if last.class != StageClass::Transport {
                    return Err(ParseError::MissingTransport);
                }
                if let Some(extra) = rest.iter().find(|s| s.class == StageClass::Transport) {
                    return Err(ParseError::UnexpectedStage {
                        transport: extra.name.clone(),
                        token: last.name.clone(),
                    });
                }
                Ok(Self { stages })
            }
        }
    }

    /// All stages, outermost first.
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// The base transport (the innermost stage).
    pub fn transport(&self) -> &StageSpec {
        // from_stages and parse_with never build an empty list
        &self.stages[self.stages.len() - 1]
    }

    /// The filters, outermost first.
    pub fn filters(&self) -> &[StageSpec] {
        &self.stages[..self.stages.len() - 1]
    }
}

impl fmt::Display for StackSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

impl FromStr for StackSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits `s` on commas outside parentheses. Offsets are relative to `base`.
fn split_top_level(s: &str, base: usize) -> Result<Vec<(usize, &str)>, ParseError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return Err(ParseError::UnbalancedParens { pos: base + i });
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                parts.push((base + start, &s[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseError::UnbalancedParens { pos: base + s.len() });
    }
    parts.push((base + start, &s[start..]));
    Ok(parts)
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parses `name` or `name(k=v,...)`.
fn parse_stage(pos: usize, raw: &str) -> Result<(&str, BTreeMap<String, String>), ParseError> {
    if raw.is_empty() {
        return Err(ParseError::EmptyStage { pos });
    }

    let (name, inner) = match raw.find('(') {
        None => (raw, None),
        Some(open) => {
            if !raw.ends_with(')') {
                return Err(ParseError::Malformed {
                    pos,
                    reason: format!("trailing text after parameters in '{}'", raw),
                });
            }
            (&raw[..open], Some((pos + open + 1, &raw[open + 1..raw.len() - 1])))
        }
    };

    if !valid_name(name) {
        return Err(ParseError::Malformed {
            pos,
            reason: format!("invalid stage name '{}'", name),
        });
    }

    let mut params = BTreeMap::new();
    let Some((ipos, inner)) = inner else {
        return Ok((name, params));
    };
    if inner.is_empty() {
        return Ok((name, params));
    }

    for (kpos, item) in split_top_level(inner, ipos)? {
        let (key, value) = item.split_once('=').unwrap_or((item, ""));
        if key.is_empty() || key.contains(['(', ')']) {
            return Err(ParseError::Malformed {
                pos: kpos,
                reason: format!("invalid parameter '{}' for '{}'", item, name),
            });
        }
        if params.insert(key.to_string(), value.to_string()).is_some() {
            return Err(ParseError::DuplicateParam {
                stage: name.to_string(),
                key: key.to_string(),
            });
        }
    }

    Ok((name, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ssl_over_sctp() {
        let spec = StackSpec::parse(
            "ssl(key=/k/key.pem,cert=/k/cert.pem,clientauth),sctp,3023",
        )
        .unwrap();
        assert_eq!(spec.stages().len(), 2);
        let ssl = &spec.filters()[0];
        assert_eq!(ssl.name, "ssl");
        assert_eq!(ssl.class, StageClass::Filter);
        assert_eq!(ssl.param("key"), Some("/k/key.pem"));
        assert_eq!(ssl.param("cert"), Some("/k/cert.pem"));
        assert!(ssl.flag("clientauth").unwrap());
        let sctp = spec.transport();
        assert_eq!(sctp.name, "sctp");
        assert_eq!(sctp.args, vec!["3023"]);
    }

    #[test]
    fn test_parse_connect_positional_params() {
        let registry = StageRegistry::with_builtins();
        let spec =
            StackSpec::parse_with("mux,sctp,localhost,3023", &registry, Some(Role::Connect))
                .unwrap();
        assert_eq!(spec.filters()[0].name, "mux");
        assert_eq!(spec.transport().args, vec!["localhost", "3023"]);
    }

    #[test]
    fn test_parse_echo() {
        let spec = StackSpec::parse("echo").unwrap();
        assert!(spec.filters().is_empty());
        assert_eq!(spec.transport().name, "echo");
    }

    #[test]
    fn test_nested_parens_in_value() {
        let spec = StackSpec::parse("ssl(key=a(b,c),cert=d),tcp,localhost,80").unwrap();
        let ssl = &spec.filters()[0];
        assert_eq!(ssl.param("key"), Some("a(b,c)"));
        assert_eq!(ssl.param("cert"), Some("d"));
    }

    #[test]
    fn test_unbalanced_parens() {
        assert!(matches!(
            StackSpec::parse("ssl(key=a,tcp,localhost,80"),
            Err(ParseError::UnbalancedParens { .. })
        ));
        assert!(matches!(
            StackSpec::parse("ssl),tcp,localhost,80"),
            Err(ParseError::UnbalancedParens { pos: 3 })
        ));
        assert!(matches!(
            StackSpec::parse("ssl(a)(b),tcp,localhost,80"),
            Err(ParseError::UnbalancedParens { .. })
        ));
    }

    #[test]
    fn test_unknown_stage() {
        assert_eq!(
            StackSpec::parse("bogus,tcp,localhost,80"),
            Err(ParseError::UnknownStage("bogus".to_string()))
        );
    }

    #[test]
    fn test_missing_transport() {
        assert_eq!(StackSpec::parse("ssl,mux"), Err(ParseError::MissingTransport));
        assert_eq!(StackSpec::parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn test_missing_host_for_connect() {
        let registry = StageRegistry::with_builtins();
        let err = StackSpec::parse_with("tcp,3023", &registry, Some(Role::Connect)).unwrap_err();
        assert!(matches!(err, ParseError::MissingParam { .. }));
        assert!(StackSpec::parse_with("tcp,3023", &registry, Some(Role::Accept)).is_ok());
        let err = StackSpec::parse_with("tcp", &registry, Some(Role::Accept)).unwrap_err();
        assert!(matches!(err, ParseError::MissingParam { .. }));
    }

    #[test]
    fn test_stage_after_transport_rejected() {
        let err = StackSpec::parse("tcp,localhost,ssl(key=x)").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedStage { .. }));
    }

    #[test]
    fn test_empty_stage() {
        assert!(matches!(
            StackSpec::parse("ssl,,tcp,localhost,80"),
            Err(ParseError::EmptyStage { pos: 4 })
        ));
    }

    #[test]
    fn test_duplicate_param() {
        let err = StackSpec::parse("mux(chunksize=1,chunksize=2),tcp,localhost,80").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateParam { .. }));
    }

    #[test]
    fn test_render_canonical() {
        let spec =
            StackSpec::parse("ssl(clientauth,cert=c.pem,key=k.pem),mux(chunksize=64),tcp,localhost,3023")
                .unwrap();
        assert_eq!(
            spec.to_string(),
            "ssl(cert=c.pem,clientauth,key=k.pem),mux(chunksize=64),tcp,localhost,3023"
        );
        assert_eq!(StackSpec::parse(&spec.to_string()).unwrap(), spec);
    }

    #[test]
    fn test_from_stages_requires_transport_last() {
        let ok = StackSpec::from_stages(vec![
            StageSpec::filter("mux"),
            StageSpec::transport("tcp").with_arg("localhost").with_arg("80"),
        ])
        .unwrap();
        assert_eq!(ok.to_string(), "mux,tcp,localhost,80");
        assert!(StackSpec::from_stages(vec![StageSpec::filter("mux")]).is_err());
        assert!(StackSpec::from_stages(vec![]).is_err());
    }

    #[test]
    fn test_flag_parsing() {
        let spec = StageSpec::filter("ssl")
            .with_param("a", "")
            .with_param("b", "false")
            .with_param("c", "maybe");
        assert!(spec.flag("a").unwrap());
        assert!(!spec.flag("b").unwrap());
        assert!(!spec.flag("missing").unwrap());
        assert!(spec.flag("c").is_err());
    }
}
