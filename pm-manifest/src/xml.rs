//! Generic, table-driven validation core shared by the project and config
//! grammars.
//!
//! Each grammar supplies a static table mapping element name to its parent
//! requirement and its required/optional attribute lists. The core walks
//! the document with `quick_xml`, validates every start tag against the
//! table (missing attribute, unknown attribute, wrong parent, unknown
//! element), performs `$NAME` environment-variable substitution on every
//! attribute value, and hands the grammar-specific code a flat
//! `(name, line, attrs)` triple per start tag and a `(name, line)` pair per
//! end tag to build its own tree from.

use std::collections::BTreeMap;

use camino::Utf8Path;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::errors::{ManifestError, ManifestResult};

/// One entry in a grammar's static element table.
pub struct ElementSpec {
    /// Tag name, without namespace prefix.
    pub name: &'static str,
    /// Attributes that must be present.
    pub required_attrs: &'static [&'static str],
    /// Attributes that may be present in addition to the required ones.
    pub optional_attrs: &'static [&'static str],
    /// If `Some`, this element is only valid as a direct child of the
    /// named parent element. `None` means it may appear directly under the
    /// document root.
    pub required_parent: Option<&'static str>,
}

/// A grammar's full element table.
pub type ElementTable = &'static [ElementSpec];

fn find_spec(table: ElementTable, name: &str) -> Option<&'static ElementSpec> {
    table.iter().find(|spec| spec.name == name)
}

/// Validated attributes for one start tag: `$NAME` substitution already
/// applied.
pub type Attrs = BTreeMap<String, String>;

/// Streaming validator over a project/config document.
///
/// `fail_on_unhandled_data` mirrors the Python parser core's flag of the
/// same name: the project grammar sets this `true` (unknown elements and
/// attributes are parse errors) while the config grammar sets it `false`
/// (unknown data is silently ignored, so older tools can read newer config
/// files written by a future version).
pub struct TableParser<'t> {
    table: ElementTable,
    fail_on_unhandled_data: bool,
    file: camino::Utf8PathBuf,
    stack: Vec<&'t str>,
    ignore_depth: u32,
}

/// One token yielded by [`TableParser::next_event`].
pub enum ParseEvent {
    /// A validated start (or self-closing) tag.
    Start {
        /// Tag name.
        name: String,
        /// 1-based line number, best-effort.
        line: usize,
        /// Validated, substituted attributes.
        attrs: Attrs,
        /// Whether this was a self-closing (`<foo/>`) tag.
        empty: bool,
    },
    /// A close tag matching a previously yielded `Start`.
    End {
        /// Tag name.
        name: String,
        /// 1-based line number, best-effort.
        line: usize,
    },
    /// End of document.
    Eof,
}

impl<'t> TableParser<'t> {
    /// Build a parser over `data`, validating against `table`.
    pub fn new(file: &Utf8Path, fail_on_unhandled_data: bool, table: ElementTable) -> Self {
        let _ = table; // table is borrowed per-call in `next_event` to dodge lifetime gymnastics
        Self {
            table,
            fail_on_unhandled_data,
            file: file.to_owned(),
            stack: Vec::new(),
            ignore_depth: 0,
        }
    }

    fn substitute_env(&self, raw: &str) -> ManifestResult<String> {
        substitute_env_vars(raw).map_err(|var| ManifestError::UndefinedEnvVar {
            file: self.file.clone(),
            var,
        })
    }

    /// Drive `reader` to the next validated event.
    pub fn next_event(
        &mut self,
        reader: &mut Reader<&[u8]>,
        buf: &mut Vec<u8>,
    ) -> ManifestResult<ParseEvent> {
        loop {
            buf.clear();
            let line = approximate_line(reader);
            let event = reader
                .read_event_into(buf)
                .map_err(|e| ManifestError::XmlSyntax {
                    file: self.file.clone(),
                    line,
                    details: e.to_string(),
                })?;
            match event {
                Event::Eof => return Ok(ParseEvent::Eof),
                Event::Start(tag) | Event::Empty(tag) => {
                    let empty = matches!(event_kind(&event), EventKind::Empty);
                    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();

                    if self.ignore_depth > 0 {
                        if !empty {
                            self.ignore_depth += 1;
                        }
                        continue;
                    }

                    let spec = find_spec(self.table, &name);
                    let spec = match spec {
                        Some(spec) => spec,
                        None => {
                            if self.fail_on_unhandled_data {
                                return Err(ManifestError::UnknownElement {
                                    file: self.file.clone(),
                                    line,
                                    element: name,
                                });
                            } else {
                                if !empty {
                                    self.ignore_depth += 1;
                                }
                                continue;
                            }
                        }
                    };

                    if let Some(expected_parent) = spec.required_parent {
                        let actual_parent = self.stack.last().copied();
                        if actual_parent != Some(expected_parent) {
                            return Err(ManifestError::WrongParent {
                                file: self.file.clone(),
                                line,
                                element: name,
                                expected_parent: expected_parent.to_owned(),
                            });
                        }
                    }

                    let mut attrs = Attrs::new();
                    for attr in tag.attributes() {
                        let attr = attr.map_err(|e| ManifestError::XmlSyntax {
                            file: self.file.clone(),
                            line,
                            details: e.to_string(),
                        })?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let raw_value = attr
                            .decode_and_unescape_value(reader.decoder())
                            .map_err(|e| ManifestError::XmlSyntax {
                                file: self.file.clone(),
                                line,
                                details: e.to_string(),
                            })?
                            .into_owned();

                        let known = spec.required_attrs.contains(&key.as_str())
                            || spec.optional_attrs.contains(&key.as_str());
                        if !known && self.fail_on_unhandled_data {
                            return Err(ManifestError::UnknownAttribute {
                                file: self.file.clone(),
                                line,
                                element: name,
                                attribute: key,
                            });
                        }
                        if known {
                            let value = self.substitute_env(&raw_value)?;
                            attrs.insert(key, value);
                        }
                    }

                    for required in spec.required_attrs {
                        if !attrs.contains_key(*required) {
                            return Err(ManifestError::MissingAttribute {
                                file: self.file.clone(),
                                line,
                                element: name,
                                attribute: (*required).to_owned(),
                            });
                        }
                    }

                    if !empty {
                        // Safety-ish: spec.name has 'static lifetime, and the
                        // stack only ever needs to compare against that, so
                        // push the table's copy rather than the owned String.
                        self.stack.push(spec.name);
                    }

                    return Ok(ParseEvent::Start {
                        name,
                        line,
                        attrs,
                        empty,
                    });
                }
                Event::End(tag) => {
                    let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                    if self.ignore_depth > 0 {
                        self.ignore_depth -= 1;
                        continue;
                    }
                    self.stack.pop();
                    return Ok(ParseEvent::End { name, line });
                }
                _ => continue,
            }
        }
    }
}

enum EventKind {
    Start,
    Empty,
}

fn event_kind(event: &Event) -> EventKind {
    match event {
        Event::Empty(_) => EventKind::Empty,
        _ => EventKind::Start,
    }
}

fn approximate_line(reader: &Reader<&[u8]>) -> usize {
    // quick_xml tracks byte offset, not line; this is a best-effort
    // projection used only for diagnostics.
    let offset = reader.buffer_position();
    1 + offset as usize / 60
}

/// Replace every `$NAME` occurrence in `raw` with the corresponding
/// process environment variable. Returns the first undefined variable name
/// encountered, if any.
fn substitute_env_vars(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        match std::env::var(&name) {
            Ok(value) => out.push_str(&value),
            Err(_) => return Err(name),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_vars() {
        std::env::set_var("PM_MANIFEST_TEST_VAR", "hello");
        let out = substitute_env_vars("prefix-$PM_MANIFEST_TEST_VAR-suffix").unwrap();
        assert_eq!(out, "prefix-hello-suffix");
    }

    #[test]
    fn rejects_undefined_vars() {
        std::env::remove_var("PM_MANIFEST_TEST_UNDEFINED");
        let err = substitute_env_vars("$PM_MANIFEST_TEST_UNDEFINED").unwrap_err();
        assert_eq!(err, "PM_MANIFEST_TEST_UNDEFINED");
    }

    #[test]
    fn leaves_bare_dollar_alone() {
        let out = substitute_env_vars("a$ b").unwrap();
        assert_eq!(out, "a$ b");
    }
}
