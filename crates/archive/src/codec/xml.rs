//! XML records, as written by archive versions 1 and 2.
//!
//! Values are stored as typed tags:
//!
//! ```xml
//! <preferences>
//!   <string name="theme">dark</string>
//!   <boolean name="compact" value="true"/>
//!   <int name="columns" value="3"/>
//!   <list name="recent"><string>a</string><string>b</string></list>
//! </preferences>
//! ```

use exn::ResultExt;
use folio_store::dates;
use folio_store::models::Style;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Write};
use tracing::instrument;

use super::{ReadContext, RecordReader, RecordWriter, WriteContext};
use crate::error::{ErrorKind, Result};
use crate::metadata::ArchiveMetaData;
use crate::record::{ArchiveReaderRecord, RecordType};
use crate::results::{ExportResults, ImportResults};

const TAG_STYLE: &str = "style";
/// Wrapper around the header in older archives.
const TAG_INFO_LIST: &str = "info-list";
/// Header element name used before `metadata`.
const TAG_INFO: &str = "info";
const ATTR_NAME: &str = "name";
const ATTR_VALUE: &str = "value";

// =============================================================================
// Document tree
// =============================================================================

/// A parsed element. Records are small enough to be read whole.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: BTreeMap<String, String>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let mut attributes = BTreeMap::new();
        for attr in start.attributes() {
            let attr = attr.or_raise(|| ErrorKind::format("malformed XML attribute"))?;
            let value = attr.unescape_value().or_raise(|| ErrorKind::format("malformed XML attribute"))?;
            attributes.insert(String::from_utf8_lossy(attr.key.as_ref()).into_owned(), value.into_owned());
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn parse_attr<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.attr(name) {
            None => Ok(None),
            Some(value) => match value.trim().parse() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => exn::bail!(ErrorKind::format(format!("invalid {name} on <{}>", self.name))),
            },
        }
    }

    /// The decoded value of a typed tag, or `None` for any other element.
    fn typed_value(&self) -> Result<Option<Value>> {
        let scalar = || {
            self.attr(ATTR_VALUE)
                .ok_or_else(|| exn::Exn::from(ErrorKind::format(format!("<{}> without a value", self.name))))
        };
        let value = match self.name.as_str() {
            "string" => Value::String(self.attr(ATTR_VALUE).map_or_else(|| self.text.clone(), String::from)),
            "boolean" => Value::Bool(scalar()?.trim().eq_ignore_ascii_case("true")),
            "int" | "long" => match scalar()?.trim().parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => exn::bail!(ErrorKind::format(format!("invalid <{}> value", self.name))),
            },
            "float" | "double" => match scalar()?.trim().parse::<f64>() {
                Ok(n) => Number::from_f64(n).map_or(Value::Null, Value::Number),
                Err(_) => exn::bail!(ErrorKind::format(format!("invalid <{}> value", self.name))),
            },
            "set" | "list" => {
                let mut items = Vec::with_capacity(self.children.len());
                for child in &self.children {
                    if let Some(item) = child.typed_value()? {
                        items.push(item);
                    }
                }
                Value::Array(items)
            },
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Named typed children as a map. Unknown or unnamed children are ignored.
    fn typed_map(&self) -> Result<Map<String, Value>> {
        let mut map = Map::new();
        for child in &self.children {
            let Some(name) = child.attr(ATTR_NAME) else {
                continue;
            };
            if let Some(value) = child.typed_value()? {
                map.insert(name.to_string(), value);
            }
        }
        Ok(map)
    }
}

/// Parse a whole document and return its root element.
fn parse_document(input: impl BufRead) -> Result<Element> {
    let mut xml = quick_xml::Reader::from_reader(input);
    xml.config_mut().trim_text(true);
    let mut stack = vec![Element::default()];
    let mut buf = Vec::new();
    loop {
        let event = xml.read_event_into(&mut buf).or_raise(|| ErrorKind::format("malformed XML"))?;
        match event {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            },
            Event::End(_) => {
                let element = stack.pop();
                match (element, stack.last_mut()) {
                    (Some(element), Some(parent)) => parent.children.push(element),
                    _ => exn::bail!(ErrorKind::format("unbalanced XML")),
                }
            },
            Event::Text(text) => {
                let text = text.unescape().or_raise(|| ErrorKind::format("malformed XML text"))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            },
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }
    let mut document = match stack.len() {
        1 => stack.remove(0),
        _ => exn::bail!(ErrorKind::format("unterminated XML element")),
    };
    match document.children.len() {
        1 => Ok(document.children.remove(0)),
        _ => exn::bail!(ErrorKind::format("XML record needs exactly one root element")),
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Reads metadata, styles and preferences from XML.
#[derive(Debug)]
pub struct XmlRecordReader {
    record_type: RecordType,
}

impl XmlRecordReader {
    pub fn new(record_type: RecordType) -> Self {
        Self { record_type }
    }
}

fn style_from_xml(element: &Element) -> Result<Style> {
    let uuid = element
        .attr("uuid")
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| exn::Exn::from(ErrorKind::format("style without a uuid")))?;
    let mut style = Style::new(uuid, element.attr(ATTR_NAME).unwrap_or_default());
    style.preferred = element.parse_attr("preferred")?.unwrap_or_default();
    style.menu_position = element.parse_attr("menu_position")?.unwrap_or_default();
    style.settings = element.typed_map()?;
    Ok(style)
}

impl RecordReader for XmlRecordReader {
    fn read_metadata(&mut self, record: &mut ArchiveReaderRecord<'_>) -> Result<Option<ArchiveMetaData>> {
        let root = parse_document(BufReader::new(&mut *record))?;
        let is_header = |element: &Element| element.name == RecordType::MetaData.name() || element.name == TAG_INFO;
        let header = match root.name.as_str() {
            TAG_INFO_LIST => root.children.iter().find(|child| is_header(child)),
            _ => Some(&root).filter(|root| is_header(root)),
        };
        let Some(header) = header else {
            return Ok(None);
        };
        let values = header.typed_map()?;
        let number = |key: &str| values.get(key).and_then(Value::as_u64);
        // Old writers put the version on the header tag itself.
        let version = match header.parse_attr::<u64>("version")? {
            Some(version) => version,
            None => number("version").ok_or_else(|| exn::Exn::from(ErrorKind::format("metadata without a version")))?,
        };
        Ok(Some(ArchiveMetaData {
            version: u32::try_from(version).or_raise(|| ErrorKind::UnsupportedVersion(u32::MAX))?,
            creator: values.get("creator").and_then(Value::as_str).map(String::from),
            created: values.get("created").and_then(Value::as_str).and_then(dates::parse_iso),
            book_count: number("books").map(|n| n as usize),
            cover_count: number("covers").map(|n| n as usize),
        }))
    }

    #[instrument(skip_all, fields(record = record.name()))]
    fn read(&mut self, ctx: &ReadContext<'_>, record: &mut ArchiveReaderRecord<'_>) -> Result<ImportResults> {
        let mut results = ImportResults::default();
        let catalogue = ctx.catalogue;
        match self.record_type {
            RecordType::MetaData => return Ok(results),
            RecordType::Styles => {
                let root = parse_document(BufReader::new(&mut *record))?;
                let styles = root
                    .children
                    .iter()
                    .filter(|child| child.name == TAG_STYLE)
                    .map(style_from_xml)
                    .collect::<Result<Vec<_>>>()?;
                catalogue
                    .write_transaction(|| {
                        for style in &styles {
                            catalogue.styles().upsert(style)?;
                        }
                        Ok(())
                    })
                    .or_raise(|| ErrorKind::Storage)?;
                results.styles = styles.len();
            },
            RecordType::Preferences => {
                let root = parse_document(BufReader::new(&mut *record))?;
                let values: BTreeMap<String, Value> = root.typed_map()?.into_iter().collect();
                catalogue.preferences().set_all(&values).or_raise(|| ErrorKind::Storage)?;
                results.preferences = 1;
            },
            other => exn::bail!(ErrorKind::Unsupported(format!("{other} as XML"))),
        }
        results.record_types.insert(self.record_type);
        Ok(results)
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Writes metadata, styles and preferences as XML.
#[derive(Debug)]
pub struct XmlRecordWriter {
    record_type: RecordType,
}

impl XmlRecordWriter {
    pub fn new(record_type: RecordType) -> Self {
        Self { record_type }
    }
}

type XmlWriter<'w> = Writer<&'w mut dyn Write>;

fn write_event(xml: &mut XmlWriter<'_>, event: Event<'_>) -> Result<()> {
    xml.write_event(event).or_raise(|| ErrorKind::Io)
}

fn write_typed(xml: &mut XmlWriter<'_>, name: Option<&str>, value: &Value) -> Result<()> {
    let tag = |kind: &'static str| {
        let mut start = BytesStart::new(kind);
        if let Some(name) = name {
            start.push_attribute((ATTR_NAME, name));
        }
        start
    };
    match value {
        Value::Null => Ok(()),
        Value::String(text) => {
            write_event(xml, Event::Start(tag("string")))?;
            write_event(xml, Event::Text(BytesText::new(text)))?;
            write_event(xml, Event::End(BytesEnd::new("string")))
        },
        Value::Bool(flag) => {
            let start = tag("boolean").with_attributes([(ATTR_VALUE, if *flag { "true" } else { "false" })]);
            write_event(xml, Event::Empty(start))
        },
        Value::Number(number) => {
            let kind = match number.is_f64() {
                true => "double",
                false => "long",
            };
            let text = number.to_string();
            write_event(xml, Event::Empty(tag(kind).with_attributes([(ATTR_VALUE, text.as_str())])))
        },
        Value::Array(items) => {
            write_event(xml, Event::Start(tag("list")))?;
            for item in items {
                write_typed(xml, None, item)?;
            }
            write_event(xml, Event::End(BytesEnd::new("list")))
        },
        Value::Object(_) => exn::bail!(ErrorKind::Unsupported("nested objects in XML".to_string())),
    }
}

fn write_map<'a>(
    xml: &mut XmlWriter<'_>,
    start: BytesStart<'_>,
    values: impl IntoIterator<Item = (&'a String, &'a Value)>,
) -> Result<()> {
    let end = start.to_end().into_owned();
    write_event(xml, Event::Start(start))?;
    for (name, value) in values {
        write_typed(xml, Some(name), value)?;
    }
    write_event(xml, Event::End(end))
}

fn write_document(out: &mut dyn Write, body: impl FnOnce(&mut XmlWriter<'_>) -> Result<()>) -> Result<()> {
    let mut xml = Writer::new_with_indent(out, b' ', 2);
    write_event(&mut xml, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    body(&mut xml)
}

impl RecordWriter for XmlRecordWriter {
    fn write_metadata(&mut self, out: &mut dyn Write, metadata: &ArchiveMetaData) -> Result<()> {
        let mut values = BTreeMap::from([("version".to_string(), Value::from(metadata.version))]);
        if let Some(creator) = &metadata.creator {
            values.insert("creator".to_string(), Value::from(creator.as_str()));
        }
        if let Some(created) = metadata.created {
            values.insert("created".to_string(), Value::from(dates::to_sql(created)));
        }
        if let Some(books) = metadata.book_count {
            values.insert("books".to_string(), Value::from(books));
        }
        if let Some(covers) = metadata.cover_count {
            values.insert("covers".to_string(), Value::from(covers));
        }
        write_document(out, |xml| write_map(xml, BytesStart::new(RecordType::MetaData.name()), &values))
    }

    #[instrument(skip_all, fields(record = %self.record_type))]
    fn write(
        &mut self,
        ctx: &WriteContext<'_>,
        out: &mut dyn Write,
        types: &BTreeSet<RecordType>,
    ) -> Result<ExportResults> {
        let mut results = ExportResults::default();
        if !types.contains(&self.record_type) {
            return Ok(results);
        }
        match self.record_type {
            RecordType::Styles => {
                let styles = ctx.catalogue.styles().all().or_raise(|| ErrorKind::Storage)?;
                if styles.is_empty() {
                    return Ok(results);
                }
                write_document(out, |xml| {
                    write_event(xml, Event::Start(BytesStart::new(RecordType::Styles.name())))?;
                    for style in &styles {
                        let menu_position = style.menu_position.to_string();
                        let start = BytesStart::new(TAG_STYLE).with_attributes([
                            ("uuid", style.uuid.as_str()),
                            (ATTR_NAME, style.name.as_str()),
                            ("preferred", if style.preferred { "true" } else { "false" }),
                            ("menu_position", menu_position.as_str()),
                        ]);
                        write_map(xml, start, &style.settings)?;
                    }
                    write_event(xml, Event::End(BytesEnd::new(RecordType::Styles.name())))
                })?;
                results.styles = styles.len();
            },
            RecordType::Preferences => {
                let preferences = ctx.catalogue.preferences().all().or_raise(|| ErrorKind::Storage)?;
                if preferences.is_empty() {
                    return Ok(results);
                }
                write_document(out, |xml| {
                    write_map(xml, BytesStart::new(RecordType::Preferences.name()), &preferences)
                })?;
                results.preferences = 1;
            },
            other => exn::bail!(ErrorKind::Unsupported(format!("{other} as XML"))),
        }
        results.record_types.insert(self.record_type);
        Ok(results)
    }
}
