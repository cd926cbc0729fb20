//! Tag-based markup form.
//!
//! A lightweight textual interchange format driven by the `tag` fields in
//! the schema: `<p>hello <b>world</b></p>`, with node attributes as
//! `key="value"` pairs and non-text leaves self-closing (`<img src="x"/>`).
//! Types without a tag (the document root, typically) render their children
//! transparently. Parsing runs through the schema, so the result obeys the
//! content grammars or the parse fails.

use std::fmt::Write as _;

use serde_json::Value;

use crate::{
  node::{
    Fragment,
    Mark,
    MarkSet,
    Node,
  },
  schema::{
    Attrs,
    Schema,
    SchemaError,
  },
};

pub type Result<T> = std::result::Result<T, MarkupError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MarkupError {
  #[error("unknown tag <{tag}> at offset {offset}")]
  UnknownTag { tag: String, offset: usize },

  #[error("closing </{found}> does not match <{expected}> at offset {offset}")]
  MismatchedClose {
    expected: String,
    found:    String,
    offset:   usize,
  },

  #[error("markup syntax error at offset {offset}: {message}")]
  Syntax { offset: usize, message: String },

  #[error(transparent)]
  Schema(#[from] SchemaError),
}

/// Render a node to markup. Nodes and marks whose types carry no `tag` are
/// rendered transparently (children only).
pub fn render(node: &Node) -> String {
  let mut out = String::new();
  render_node(node, &mut out);
  out
}

fn render_node(node: &Node, out: &mut String) {
  if let Some(text) = node.text() {
    let tagged: Vec<&Mark> = node
      .marks()
      .iter()
      .filter(|m| m.mark_type().spec().tag.is_some())
      .collect();
    for mark in &tagged {
      if let Some(tag) = &mark.mark_type().spec().tag {
        open_tag(tag, mark.attrs(), false, out);
      }
    }
    escape_into(text, out);
    for mark in tagged.iter().rev() {
      if let Some(tag) = &mark.mark_type().spec().tag {
        let _ = write!(out, "</{tag}>");
      }
    }
    return;
  }

  match &node.node_type().spec().tag {
    None => {
      for child in node.content().iter() {
        render_node(child, out);
      }
    },
    Some(tag) => {
      if node.is_leaf() {
        open_tag(tag, node.attrs(), true, out);
      } else {
        open_tag(tag, node.attrs(), false, out);
        for child in node.content().iter() {
          render_node(child, out);
        }
        let _ = write!(out, "</{tag}>");
      }
    },
  }
}

fn open_tag(tag: &str, attrs: &Attrs, self_closing: bool, out: &mut String) {
  let _ = write!(out, "<{tag}");
  for (key, value) in attrs {
    let rendered = match value {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    };
    let _ = write!(out, " {key}=\"");
    escape_into(&rendered, out);
    out.push('"');
  }
  out.push_str(if self_closing { "/>" } else { ">" });
}

fn escape_into(text: &str, out: &mut String) {
  for ch in text.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      other => out.push(other),
    }
  }
}

/// Parse markup into a document rooted at the schema's `doc` type.
pub fn parse(schema: &Schema, input: &str) -> Result<Node> {
  let mut parser = Parser {
    schema,
    input,
    pos: 0,
  };
  let children = parser.parse_nodes(&MarkSet::empty(), None)?;
  Ok(schema.node("doc", None, Fragment::from_nodes(children))?)
}

struct Parser<'a> {
  schema: &'a Schema,
  input:  &'a str,
  pos:    usize,
}

impl<'a> Parser<'a> {
  fn rest(&self) -> &'a str {
    &self.input[self.pos..]
  }

  fn syntax(&self, message: impl Into<String>) -> MarkupError {
    MarkupError::Syntax {
      offset:  self.pos,
      message: message.into(),
    }
  }

  /// Parse siblings until end of input (`until == None`) or the matching
  /// closing tag.
  fn parse_nodes(&mut self, marks: &MarkSet, until: Option<&str>) -> Result<Vec<Node>> {
    let mut out = Vec::new();
    loop {
      if self.rest().is_empty() {
        return match until {
          None => Ok(out),
          Some(tag) => Err(self.syntax(format!("unexpected end of input, expected </{tag}>"))),
        };
      }
      if self.rest().starts_with("</") {
        let offset = self.pos;
        let found = self.read_close_tag()?;
        return match until {
          Some(tag) if tag == found => Ok(out),
          _ => Err(MarkupError::MismatchedClose {
            expected: until.unwrap_or("end of input").to_owned(),
            found,
            offset,
          }),
        };
      }
      if self.rest().starts_with('<') {
        self.parse_element(marks, &mut out)?;
      } else {
        let text = self.read_text()?;
        // Whitespace runs containing newlines are formatting between tags.
        if !(text.contains('\n') && text.chars().all(char::is_whitespace)) {
          out.push(self.schema.text_with_marks(text, marks.clone()));
        }
      }
    }
  }

  fn parse_element(&mut self, marks: &MarkSet, out: &mut Vec<Node>) -> Result<()> {
    let offset = self.pos;
    let (tag, attrs, self_closing) = self.read_open_tag()?;
    let attrs_ref = if attrs.is_empty() { None } else { Some(&attrs) };

    if let Some(node_type) = self.schema.node_type_by_tag(&tag) {
      let name = node_type.name().to_owned();
      let is_leaf = node_type.is_leaf();
      let is_inline = node_type.is_inline();
      let children = if self_closing || is_leaf {
        if !self_closing {
          // A leaf written as <tag></tag>.
          self.read_close_tag_at(offset, &tag)?;
        }
        Fragment::empty()
      } else {
        Fragment::from_nodes(self.parse_nodes(&MarkSet::empty(), Some(&tag))?)
      };
      let node = self.schema.node(&name, attrs_ref, children)?;
      out.push(if is_inline && !marks.is_empty() {
        node.with_marks(marks.clone())
      } else {
        node
      });
      return Ok(());
    }

    if let Some(mark_type) = self.schema.mark_type_by_tag(&tag) {
      if self_closing {
        return Err(self.syntax(format!("mark tag <{tag}/> cannot be self-closing")));
      }
      let mark = self.schema.mark(mark_type.name(), attrs_ref)?;
      let inner = self.parse_nodes(&marks.add(&mark), Some(&tag))?;
      out.extend(inner);
      return Ok(());
    }

    Err(MarkupError::UnknownTag { tag, offset })
  }

  fn read_text(&mut self) -> Result<String> {
    let end = self.rest().find('<').unwrap_or(self.rest().len());
    let raw = &self.rest()[..end];
    self.pos += end;
    self.unescape(raw)
  }

  fn unescape(&self, raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
      out.push_str(&rest[..idx]);
      rest = &rest[idx..];
      let entity = ["&amp;", "&lt;", "&gt;", "&quot;"]
        .iter()
        .find(|e| rest.starts_with(**e));
      match entity {
        Some(e) => {
          out.push(match *e {
            "&amp;" => '&',
            "&lt;" => '<',
            "&gt;" => '>',
            _ => '"',
          });
          rest = &rest[e.len()..];
        },
        None => return Err(self.syntax("unknown entity")),
      }
    }
    out.push_str(rest);
    Ok(out)
  }

  fn read_name(&mut self) -> Result<String> {
    let end = self
      .rest()
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
      .unwrap_or(self.rest().len());
    if end == 0 {
      return Err(self.syntax("expected a name"));
    }
    let name = self.rest()[..end].to_owned();
    self.pos += end;
    Ok(name)
  }

  fn skip_spaces(&mut self) {
    let skipped = self
      .rest()
      .find(|c: char| !c.is_ascii_whitespace())
      .unwrap_or(self.rest().len());
    self.pos += skipped;
  }

  fn expect(&mut self, token: char) -> Result<()> {
    if self.rest().starts_with(token) {
      self.pos += token.len_utf8();
      Ok(())
    } else {
      Err(self.syntax(format!("expected '{token}'")))
    }
  }

  fn read_open_tag(&mut self) -> Result<(String, Attrs, bool)> {
    self.expect('<')?;
    let tag = self.read_name()?;
    let mut attrs = Attrs::new();
    loop {
      self.skip_spaces();
      if self.rest().starts_with("/>") {
        self.pos += 2;
        return Ok((tag, attrs, true));
      }
      if self.rest().starts_with('>') {
        self.pos += 1;
        return Ok((tag, attrs, false));
      }
      let key = self.read_name()?;
      self.expect('=')?;
      self.expect('"')?;
      let end = self
        .rest()
        .find('"')
        .ok_or_else(|| self.syntax("unterminated attribute value"))?;
      let raw = self.unescape(&self.rest()[..end])?;
      self.pos += end + 1;
      attrs.insert(key, attr_value(&raw));
    }
  }

  fn read_close_tag(&mut self) -> Result<String> {
    self.pos += 2; // "</"
    let name = self.read_name()?;
    self.expect('>')?;
    Ok(name)
  }

  fn read_close_tag_at(&mut self, offset: usize, expected: &str) -> Result<String> {
    if !self.rest().starts_with("</") {
      return Err(self.syntax(format!("expected </{expected}>")));
    }
    let found = self.read_close_tag()?;
    if found != expected {
      return Err(MarkupError::MismatchedClose {
        expected: expected.to_owned(),
        found,
        offset,
      });
    }
    Ok(found)
  }
}

/// Attribute values parse as JSON scalars when they look like one, and as
/// strings otherwise.
fn attr_value(raw: &str) -> Value {
  match serde_json::from_str::<Value>(raw) {
    Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
    _ => Value::String(raw.to_owned()),
  }
}
