//! Slave-mode configuration grammar reader.
//!
//! Parses the nested-block text format used to describe zone master
//! bindings for database-less slave operation:
//!
//! ```text
//! transfer_interval 3600;
//! transfer_timeout 300;
//! max_retries 3;
//! retry_delay 300;
//!
//! master primary {
//!     host 192.0.2.1;
//!     port 53;
//!     tsig_key example-key hmac-sha256 c2VjcmV0;
//!     zones {
//!         example.com.
//!         example.net.
//!     }
//! }
//! ```
//!
//! This is a small hand-written recursive-descent reader over a
//! brace/semicolon grammar, not a general config-file framework: the only
//! thing downstream components ever see is the parsed binding list, never
//! the source text.

use std::time::Duration;

use derive_more::{Display, Error};

use crate::dns::tsig::TsigKey;
use crate::dns::zone_transfer::SlaveZoneConfig;

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display(fmt = "line {}: unexpected end of input, expected {}", line, expected)]
    UnexpectedEof { line: usize, expected: &'static str },
    #[display(fmt = "line {}: expected {}, found `{}`", line, expected, found)]
    UnexpectedToken {
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[display(fmt = "line {}: invalid port `{}`", line, value)]
    InvalidPort { line: usize, value: String },
    #[display(fmt = "line {}: invalid integer `{}`", line, value)]
    InvalidInt { line: usize, value: String },
    #[display(fmt = "line {}: unknown directive `{}`", line, directive)]
    UnknownDirective { line: usize, directive: String },
    #[display(fmt = "line {}: master label `{}` declared more than once", line, label)]
    DuplicateMaster { line: usize, label: String },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// The four global directives, each independently overridable; defaults
/// match §6.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub transfer_interval: Duration,
    pub transfer_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            transfer_interval: Duration::from_secs(3600),
            transfer_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_secs(300),
        }
    }
}

/// One `master { ... }` block: the server this process pulls zones from,
/// and the zones it serves.
#[derive(Debug, Clone)]
pub struct MasterBinding {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub tsig_key: Option<TsigKey>,
    pub zones: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    pub global: GlobalConfig,
    pub masters: Vec<MasterBinding>,
}

impl ParsedConfig {
    /// Expands every zone named in every master binding into the
    /// `SlaveZoneConfig` the transfer scheduler and NOTIFY listener
    /// operate on, applying the global directives as the per-zone
    /// transfer/retry schedule.
    pub fn slave_zone_configs(&self) -> Vec<SlaveZoneConfig> {
        self.masters
            .iter()
            .flat_map(|m| {
                m.zones.iter().map(move |zone| SlaveZoneConfig {
                    zone: zone.clone(),
                    master_host: m.host.clone(),
                    master_port: m.port,
                    tsig_key: m.tsig_key.clone(),
                    transfer_interval: self.global.transfer_interval,
                    retry_interval: self.global.retry_delay,
                    max_failures: self.global.max_retries,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    LBrace,
    RBrace,
    Semicolon,
}

struct Lexer<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    _src: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        let mut tokens = Vec::new();
        let mut line = 1usize;
        let mut chars = src.char_indices().peekable();
        let mut word = String::new();

        let flush = |word: &mut String, tokens: &mut Vec<(Token, usize)>, line: usize| {
            if !word.is_empty() {
                tokens.push((Token::Word(std::mem::take(word)), line));
            }
        };

        while let Some(&(_, c)) = chars.peek() {
            match c {
                '#' => {
                    // Comment: skip to end of line.
                    while let Some(&(_, c)) = chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                    }
                }
                '\n' => {
                    flush(&mut word, &mut tokens, line);
                    line += 1;
                    chars.next();
                }
                c if c.is_whitespace() => {
                    flush(&mut word, &mut tokens, line);
                    chars.next();
                }
                '{' => {
                    flush(&mut word, &mut tokens, line);
                    tokens.push((Token::LBrace, line));
                    chars.next();
                }
                '}' => {
                    flush(&mut word, &mut tokens, line);
                    tokens.push((Token::RBrace, line));
                    chars.next();
                }
                ';' => {
                    flush(&mut word, &mut tokens, line);
                    tokens.push((Token::Semicolon, line));
                    chars.next();
                }
                _ => {
                    word.push(c);
                    chars.next();
                }
            }
        }
        flush(&mut word, &mut tokens, line);

        Lexer { tokens, pos: 0, _src: src }
    }

    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn line(&self) -> usize {
        self.peek()
            .map(|(_, l)| *l)
            .or_else(|| self.tokens.last().map(|(_, l)| *l))
            .unwrap_or(1)
    }

    fn next_word(&mut self, expected: &'static str) -> Result<String> {
        match self.tokens.get(self.pos).cloned() {
            Some((Token::Word(w), _)) => {
                self.pos += 1;
                Ok(w)
            }
            Some((other, line)) => Err(ConfigError::UnexpectedToken {
                line,
                expected,
                found: format!("{:?}", other),
            }),
            None => Err(ConfigError::UnexpectedEof {
                line: self.line(),
                expected,
            }),
        }
    }

    fn expect(&mut self, tok: Token, expected: &'static str) -> Result<()> {
        match self.tokens.get(self.pos).cloned() {
            Some((t, _)) if t == tok => {
                self.pos += 1;
                Ok(())
            }
            Some((other, line)) => Err(ConfigError::UnexpectedToken {
                line,
                expected,
                found: format!("{:?}", other),
            }),
            None => Err(ConfigError::UnexpectedEof {
                line: self.line(),
                expected,
            }),
        }
    }

    fn at_rbrace(&self) -> bool {
        matches!(self.peek(), Some((Token::RBrace, _)) | None)
    }
}

/// Parses a complete configuration document.
pub fn parse(src: &str) -> Result<ParsedConfig> {
    let mut lex = Lexer::new(src);
    let mut config = ParsedConfig::default();

    while lex.peek().is_some() {
        let line = lex.line();
        let directive = lex.next_word("a directive or `master` block")?;
        match directive.as_str() {
            "master" => {
                let binding = parse_master(&mut lex)?;
                if config.masters.iter().any(|m| m.label == binding.label) {
                    return Err(ConfigError::DuplicateMaster {
                        line,
                        label: binding.label,
                    });
                }
                config.masters.push(binding);
            }
            "transfer_interval" => {
                config.global.transfer_interval =
                    Duration::from_secs(parse_seconds(&mut lex)?);
            }
            "transfer_timeout" => {
                config.global.transfer_timeout = Duration::from_secs(parse_seconds(&mut lex)?);
            }
            "max_retries" => {
                let v = lex.next_word("an integer")?;
                config.global.max_retries = v.parse().map_err(|_| ConfigError::InvalidInt {
                    line,
                    value: v,
                })?;
                lex.expect(Token::Semicolon, "`;`")?;
            }
            "retry_delay" => {
                config.global.retry_delay = Duration::from_secs(parse_seconds(&mut lex)?);
            }
            other => {
                return Err(ConfigError::UnknownDirective {
                    line,
                    directive: other.to_string(),
                })
            }
        }
    }

    Ok(config)
}

fn parse_seconds(lex: &mut Lexer) -> Result<u64> {
    let line = lex.line();
    let v = lex.next_word("a number of seconds")?;
    let parsed = v.parse().map_err(|_| ConfigError::InvalidInt { line, value: v })?;
    lex.expect(Token::Semicolon, "`;`")?;
    Ok(parsed)
}

fn parse_master(lex: &mut Lexer) -> Result<MasterBinding> {
    let label = lex.next_word("a master label")?;
    lex.expect(Token::LBrace, "`{`")?;

    let mut host = None;
    let mut port = 53u16;
    let mut tsig_key = None;
    let mut zones = Vec::new();

    while !lex.at_rbrace() {
        let line = lex.line();
        let field = lex.next_word("`host`, `port`, `tsig_key` or `zones`")?;
        match field.as_str() {
            "host" => {
                host = Some(lex.next_word("a host")?);
                lex.expect(Token::Semicolon, "`;`")?;
            }
            "port" => {
                let v = lex.next_word("a port number")?;
                port = v.parse().map_err(|_| ConfigError::InvalidPort {
                    line,
                    value: v.clone(),
                })?;
                lex.expect(Token::Semicolon, "`;`")?;
            }
            "tsig_key" => {
                let name = lex.next_word("a key name")?;
                let algorithm = lex.next_word("a key algorithm")?;
                // Secret is optional: a key declared without one is kept
                // for reference but never attached to a binding, since an
                // unsigned "TSIG key" cannot actually sign anything.
                let secret = match lex.peek() {
                    Some((Token::Word(_), _)) => Some(lex.next_word("a base64 secret")?),
                    _ => None,
                };
                lex.expect(Token::Semicolon, "`;`")?;
                tsig_key = secret.map(|s| TsigKey::new(name, algorithm, s));
            }
            "zones" => {
                lex.expect(Token::LBrace, "`{`")?;
                while !lex.at_rbrace() {
                    zones.push(lex.next_word("a zone origin")?);
                }
                lex.expect(Token::RBrace, "`}`")?;
            }
            other => {
                return Err(ConfigError::UnknownDirective {
                    line,
                    directive: other.to_string(),
                })
            }
        }
    }
    lex.expect(Token::RBrace, "`}`")?;

    let host = host.ok_or(ConfigError::UnexpectedEof {
        line: lex.line(),
        expected: "a `host` directive",
    })?;

    Ok(MasterBinding {
        label,
        host,
        port,
        tsig_key,
        zones,
    })
}
