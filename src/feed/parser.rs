use quick_xml::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{AppError, Result};

/// A validated RSS channel. Every field is trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeedDocument {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<ParsedItem>,
}

/// A channel item that carried all required fields. `pub_date` is the raw,
/// trimmed `<pubDate>` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

/// Generic element tree built from the XML event stream.
#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of a text-only child element, if non-empty.
    fn text_field(&self, name: &str) -> Option<String> {
        let child = self.child(name)?;
        if !child.children.is_empty() {
            return None;
        }
        let text = child.text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Parse an RSS 2.0 document, keeping only items that have a title, link,
/// description and publication date.
pub fn parse_feed(xml: &str) -> Result<ParsedFeedDocument> {
    let root = parse_tree(xml)?;

    let channel = root
        .children
        .iter()
        .find(|c| c.name == "rss")
        .and_then(|rss| rss.child("channel"))
        .ok_or_else(|| AppError::Parse("missing rss channel element".to_string()))?;

    let (title, link, description) = match (
        channel.text_field("title"),
        channel.text_field("link"),
        channel.text_field("description"),
    ) {
        (Some(title), Some(link), Some(description)) => (title, link, description),
        _ => {
            return Err(AppError::Validation(
                "channel is missing one of title, link, description".to_string(),
            ))
        }
    };

    let items = channel
        .children_named("item")
        .filter_map(|item| {
            let parsed = parse_item(item);
            if parsed.is_none() {
                tracing::debug!("Dropping item with missing fields in feed {}", title);
            }
            parsed
        })
        .collect();

    Ok(ParsedFeedDocument {
        title,
        link,
        description,
        items,
    })
}

fn parse_item(item: &XmlElement) -> Option<ParsedItem> {
    Some(ParsedItem {
        title: item.text_field("title")?,
        link: item.text_field("link")?,
        description: item.text_field("description")?,
        pub_date: item.text_field("pubDate")?,
    })
}

fn parse_tree(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);

    // stack[0] is a synthetic document node
    let mut stack = vec![XmlElement::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(XmlElement {
                    name: String::from_utf8_lossy(e.name().as_ref()).to_string(),
                    ..Default::default()
                });
            }
            Ok(Event::Empty(e)) => {
                let element = XmlElement {
                    name: String::from_utf8_lossy(e.name().as_ref()).to_string(),
                    ..Default::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(AppError::Parse("unexpected closing tag".to_string()));
                }
                if let Some(element) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = match e.unescape_with(resolve_entity) {
                    Ok(text) => text.into_owned(),
                    Err(_) => unescape_lenient(&String::from_utf8_lossy(&e)),
                };
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AppError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(AppError::Parse("unexpected end of document".to_string()));
    }
    Ok(stack.remove(0))
}

/// XML's predefined entities plus the HTML5 named ones (`&nbsp;`, `&mdash;`)
/// that feeds routinely emit without declaring.
fn resolve_entity(name: &str) -> Option<&'static str> {
    escape::resolve_predefined_entity(name).or_else(|| escape::resolve_html5_entity(name))
}

/// Unescapes one `&name;` reference at a time. References that cannot be
/// resolved and stray ampersands are kept as written.
fn unescape_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let name_len = rest[1..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '#'))
            .unwrap_or(rest.len() - 1);
        let end = 1 + name_len;

        if name_len > 0 && rest[end..].starts_with(';') {
            let reference = &rest[..=end];
            match escape::unescape_with(reference, resolve_entity) {
                Ok(text) => out.push_str(&text),
                Err(_) => out.push_str(reference),
            }
            rest = &rest[end + 1..];
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }

    out.push_str(rest);
    out
}
