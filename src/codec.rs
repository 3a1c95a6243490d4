//! XML ⇄ structured data codec.
//!
//! Decoding turns a document into a nested [`XmlValue`] tree keyed by
//! [`XmlKey`]s that carry their namespace separately from the local name, so
//! dropping namespaces is a projection ([`XmlValue::strip_namespaces`]) rather
//! than a re-parse. Uses quick-xml, which never expands external entities.
//!
//! Known limitation kept on purpose: attributes on an element that only holds
//! text are dropped.

use crate::error::{CodecError, SOAP_ENVELOPE_NS};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::{NsReader, Reader, Writer};
use std::fmt;

/// Marker prefix used when attribute keys are rendered as strings.
pub const ATTRIBUTE_PREFIX: char = '@';

/// Kind of a key in an [`XmlMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyKind {
    Element,
    Attribute,
}

/// A namespace-qualified key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XmlKey {
    pub kind: KeyKind,
    pub namespace: Option<String>,
    pub local: String,
}

impl XmlKey {
    pub fn element(local: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Element,
            namespace: None,
            local: local.into(),
        }
    }

    pub fn qualified(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Element,
            namespace: Some(namespace.into()),
            local: local.into(),
        }
    }

    pub fn attribute(local: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Attribute,
            namespace: None,
            local: local.into(),
        }
    }

    pub fn qualified_attribute(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Attribute,
            namespace: Some(namespace.into()),
            local: local.into(),
        }
    }

    pub fn is_attribute(&self) -> bool {
        self.kind == KeyKind::Attribute
    }

    /// Same key with the namespace removed.
    pub fn without_namespace(&self) -> Self {
        Self {
            kind: self.kind,
            namespace: None,
            local: self.local.clone(),
        }
    }

    /// True for an element key with the given local name, in any namespace.
    pub fn is_element_named(&self, local: &str) -> bool {
        self.kind == KeyKind::Element && self.local == local
    }
}

impl fmt::Display for XmlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_attribute() {
            write!(f, "{}", ATTRIBUTE_PREFIX)?;
        }
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

impl From<&str> for XmlKey {
    /// Parses the rendered form: `@attr`, `{uri}local`, `@{uri}attr`, `local`.
    fn from(s: &str) -> Self {
        let (kind, rest) = match s.strip_prefix(ATTRIBUTE_PREFIX) {
            Some(rest) => (KeyKind::Attribute, rest),
            None => (KeyKind::Element, s),
        };
        let (namespace, local) = match rest.strip_prefix('{').and_then(|r| r.split_once('}')) {
            Some((ns, local)) => (Some(ns.to_string()), local.to_string()),
            None => (None, rest.to_string()),
        };
        Self {
            kind,
            namespace,
            local,
        }
    }
}

/// Insertion-ordered map of keys to values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlMap {
    entries: Vec<(XmlKey, XmlValue)>,
}

impl XmlMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&XmlKey, &XmlValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &XmlKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn get(&self, key: &XmlKey) -> Option<&XmlValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// First element entry with the given local name, ignoring namespaces.
    pub fn get_local(&self, local: &str) -> Option<&XmlValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.is_element_named(local))
            .map(|(_, v)| v)
    }

    /// Insert or replace.
    pub fn insert(&mut self, key: XmlKey, value: XmlValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Insert, collapsing a repeated key into an ordered list.
    pub fn push_child(&mut self, key: XmlKey, value: XmlValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, XmlValue::List(items))) => items.push(value),
            Some((_, existing)) => {
                let first = std::mem::take(existing);
                *existing = XmlValue::List(vec![first, value]);
            }
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &XmlKey) -> Option<XmlValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }
}

impl FromIterator<(XmlKey, XmlValue)> for XmlMap {
    fn from_iter<I: IntoIterator<Item = (XmlKey, XmlValue)>>(iter: I) -> Self {
        let mut map = XmlMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for XmlMap {
    type Item = (XmlKey, XmlValue);
    type IntoIter = std::vec::IntoIter<(XmlKey, XmlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Generic structured representation of an XML document.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum XmlValue {
    #[default]
    Null,
    Text(String),
    List(Vec<XmlValue>),
    Map(XmlMap),
}

impl XmlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&XmlMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[XmlValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Child element by local name (maps only).
    pub fn get(&self, local: &str) -> Option<&XmlValue> {
        self.as_map().and_then(|m| m.get_local(local))
    }

    /// Every value as a list: lists as-is, null as empty, anything else as a singleton.
    pub fn to_list(&self) -> Vec<&XmlValue> {
        match self {
            Self::List(items) => items.iter().collect(),
            Self::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Drop every namespace. Keys that become equal collapse into a list.
    pub fn strip_namespaces(&self) -> XmlValue {
        match self {
            Self::Map(map) => {
                let mut stripped = XmlMap::new();
                for (key, value) in map.iter() {
                    let value = value.strip_namespaces();
                    let key = key.without_namespace();
                    if stripped.get(&key).is_some() {
                        match value {
                            XmlValue::List(items) => {
                                for item in items {
                                    stripped.push_child(key.clone(), item);
                                }
                            }
                            value => stripped.push_child(key, value),
                        }
                    } else {
                        stripped.insert(key, value);
                    }
                }
                Self::Map(stripped)
            }
            Self::List(items) => Self::List(items.iter().map(XmlValue::strip_namespaces).collect()),
            other => other.clone(),
        }
    }

    /// JSON rendering for logs and diffs.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(XmlValue::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for XmlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for XmlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<XmlMap> for XmlValue {
    fn from(m: XmlMap) -> Self {
        Self::Map(m)
    }
}

impl<T: Into<XmlValue>> From<Option<T>> for XmlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Frame {
    key: XmlKey,
    attributes: Vec<(XmlKey, XmlValue)>,
    children: XmlMap,
    text: String,
}

impl Frame {
    fn into_value(self) -> XmlValue {
        if self.children.is_empty() {
            let text = self.text.trim();
            if !text.is_empty() {
                // Leaf attributes are dropped here.
                return XmlValue::Text(text.to_string());
            }
            if self.attributes.is_empty() {
                return XmlValue::Null;
            }
            return XmlValue::Map(self.attributes.into_iter().collect());
        }
        let mut map: XmlMap = self.attributes.into_iter().collect();
        for (key, value) in self.children {
            map.insert(key, value);
        }
        XmlValue::Map(map)
    }
}

/// Decode an XML document.
///
/// The root element becomes the single top-level key. With
/// `preserve_namespace = false` every key is namespace-free.
pub fn decode(xml: &str, preserve_namespace: bool) -> Result<XmlValue, CodecError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<XmlValue> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| CodecError::InvalidXml(e.to_string()))?;
        match event {
            Event::Start(ref e) => {
                if root.is_some() && stack.is_empty() {
                    return Err(CodecError::InvalidXml("multiple root elements".to_string()));
                }
                stack.push(open_frame(&reader, e)?);
            }
            Event::Empty(ref e) => {
                if root.is_some() && stack.is_empty() {
                    return Err(CodecError::InvalidXml("multiple root elements".to_string()));
                }
                let frame = open_frame(&reader, e)?;
                close_frame(frame, &mut stack, &mut root);
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| CodecError::InvalidXml("unexpected closing tag".to_string()))?;
                close_frame(frame, &mut stack, &mut root);
            }
            Event::Text(ref e) => {
                let text = e
                    .unescape()
                    .map_err(|e| CodecError::InvalidXml(e.to_string()))?;
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(CodecError::InvalidXml(
                            "text outside of root element".to_string(),
                        ))
                    }
                }
            }
            Event::CData(ref e) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(CodecError::InvalidXml("unexpected end of document".to_string()));
    }
    let root = root.ok_or_else(|| CodecError::InvalidXml("no root element".to_string()))?;

    Ok(if preserve_namespace {
        root
    } else {
        root.strip_namespaces()
    })
}

fn open_frame(reader: &NsReader<&[u8]>, e: &BytesStart) -> Result<Frame, CodecError> {
    let (ns, local) = reader.resolve_element(e.name());
    let key = XmlKey {
        kind: KeyKind::Element,
        namespace: bound_namespace(ns),
        local: String::from_utf8_lossy(local.as_ref()).into_owned(),
    };

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| CodecError::InvalidXml(e.to_string()))?;
        let raw = attr.key.as_ref();
        if raw == b"xmlns" || raw.starts_with(b"xmlns:") {
            continue;
        }
        let (ns, local) = reader.resolve_attribute(attr.key);
        let value = attr
            .unescape_value()
            .map_err(|e| CodecError::InvalidXml(e.to_string()))?;
        attributes.push((
            XmlKey {
                kind: KeyKind::Attribute,
                namespace: bound_namespace(ns),
                local: String::from_utf8_lossy(local.as_ref()).into_owned(),
            },
            XmlValue::Text(value.into_owned()),
        ));
    }

    Ok(Frame {
        key,
        attributes,
        children: XmlMap::new(),
        text: String::new(),
    })
}

fn close_frame(frame: Frame, stack: &mut [Frame], root: &mut Option<XmlValue>) {
    let key = frame.key.clone();
    let value = frame.into_value();
    match stack.last_mut() {
        Some(parent) => parent.children.push_child(key, value),
        None => {
            let mut map = XmlMap::new();
            map.insert(key, value);
            *root = Some(XmlValue::Map(map));
        }
    }
}

fn bound_namespace(result: ResolveResult) -> Option<String> {
    match result {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Prefix assignment used while encoding.
#[derive(Debug, Clone, Default)]
struct Prefixes {
    entries: Vec<(String, String)>,
}

impl Prefixes {
    fn new(preferred: &[(&str, &str)]) -> Self {
        Self {
            entries: preferred
                .iter()
                .map(|(p, uri)| (p.to_string(), uri.to_string()))
                .collect(),
        }
    }

    fn collect(&mut self, value: &XmlValue, key: Option<&XmlKey>) {
        if let Some(k) = key {
            if let Some(uri) = k.namespace.as_deref() {
                self.ensure(uri, k.is_attribute());
            }
        }
        match value {
            XmlValue::Map(map) => {
                for (k, v) in map.iter() {
                    self.collect(v, Some(k));
                }
            }
            XmlValue::List(items) => {
                for item in items {
                    self.collect(item, None);
                }
            }
            _ => {}
        }
    }

    /// Bind `uri` unless already bound. Unprefixed attributes are in no
    /// namespace, so attributes need a bound prefix that is not the default.
    fn ensure(&mut self, uri: &str, attribute: bool) {
        if self.lookup(uri, attribute).is_some() {
            return;
        }
        let mut n = 0;
        loop {
            let candidate = format!("ns{}", n);
            if !self.entries.iter().any(|(p, _)| *p == candidate) {
                self.entries.push((candidate, uri.to_string()));
                return;
            }
            n += 1;
        }
    }

    fn lookup(&self, uri: &str, attribute: bool) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, u)| u == uri && !(attribute && p.is_empty()))
            .map(|(p, _)| p.as_str())
    }

    fn qualify(&self, key: &XmlKey) -> String {
        let prefix = key
            .namespace
            .as_deref()
            .and_then(|uri| self.lookup(uri, key.is_attribute()));
        match prefix {
            Some(p) if !p.is_empty() => format!("{}:{}", p, key.local),
            _ => key.local.clone(),
        }
    }

    fn declarations(&self, used: &[String]) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|(_, uri)| used.contains(uri))
            .map(|(p, uri)| {
                let name = if p.is_empty() {
                    "xmlns".to_string()
                } else {
                    format!("xmlns:{}", p)
                };
                (name, uri.clone())
            })
            .collect()
    }
}

/// Encode a single-root document. Namespaces are declared on the root
/// element; no XML declaration is written.
pub fn encode(value: &XmlValue) -> Result<String, CodecError> {
    encode_with_prefixes(value, &[])
}

/// Like [`encode`], with preferred `(prefix, uri)` bindings.
pub fn encode_with_prefixes(value: &XmlValue, preferred: &[(&str, &str)]) -> Result<String, CodecError> {
    let map = value
        .as_map()
        .filter(|m| m.len() == 1)
        .ok_or_else(|| CodecError::Encode("document must have exactly one root".to_string()))?;
    let (root_key, root_value) = map
        .iter()
        .next()
        .ok_or_else(|| CodecError::Encode("empty document".to_string()))?;
    if root_key.is_attribute() || matches!(root_value, XmlValue::List(_)) {
        return Err(CodecError::Encode("root must be a single element".to_string()));
    }

    let mut prefixes = Prefixes::new(preferred);
    prefixes.collect(value, None);
    let used = used_namespaces(value);
    let declarations = prefixes.declarations(&used);

    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, &prefixes, root_key, root_value, &declarations)?;
    String::from_utf8(writer.into_inner()).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Encode `body` as the content of `soap:Envelope/soap:Body/<operation_name>`.
pub fn encode_envelope(
    body: &XmlValue,
    operation_name: &str,
    operation_namespace: Option<&str>,
    preferred: &[(&str, &str)],
) -> Result<Vec<u8>, CodecError> {
    let operation_key = match operation_namespace {
        Some(ns) => XmlKey::qualified(ns, operation_name),
        None => XmlKey::element(operation_name),
    };
    let mut body_map = XmlMap::new();
    body_map.insert(operation_key, body.clone());
    let mut envelope = XmlMap::new();
    envelope.insert(
        XmlKey::qualified(SOAP_ENVELOPE_NS, "Body"),
        XmlValue::Map(body_map),
    );
    let mut document = XmlMap::new();
    document.insert(
        XmlKey::qualified(SOAP_ENVELOPE_NS, "Envelope"),
        XmlValue::Map(envelope),
    );

    let mut bindings = vec![("soap", SOAP_ENVELOPE_NS)];
    bindings.extend(preferred.iter().copied().filter(|(p, _)| *p != "soap"));
    encode_with_prefixes(&XmlValue::Map(document), &bindings).map(String::into_bytes)
}

fn used_namespaces(value: &XmlValue) -> Vec<String> {
    fn walk(value: &XmlValue, out: &mut Vec<String>) {
        match value {
            XmlValue::Map(map) => {
                for (k, v) in map.iter() {
                    if let Some(ns) = &k.namespace {
                        if !out.contains(ns) {
                            out.push(ns.clone());
                        }
                    }
                    walk(v, out);
                }
            }
            XmlValue::List(items) => items.iter().for_each(|i| walk(i, out)),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(value, &mut out);
    out
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    prefixes: &Prefixes,
    key: &XmlKey,
    value: &XmlValue,
    declarations: &[(String, String)],
) -> Result<(), CodecError> {
    let name = prefixes.qualify(key);
    let mut start = BytesStart::new(name.as_str());
    for (attr, uri) in declarations {
        start.push_attribute((attr.as_str(), uri.as_str()));
    }

    match value {
        XmlValue::Null => write_event(writer, Event::Empty(start)),
        XmlValue::Text(text) => {
            write_event(writer, Event::Start(start))?;
            write_event(writer, Event::Text(BytesText::new(text)))?;
            write_event(writer, Event::End(BytesEnd::new(name.as_str())))
        }
        XmlValue::List(_) => Err(CodecError::Encode(format!(
            "nested list under {} cannot be encoded",
            key
        ))),
        XmlValue::Map(map) => {
            let mut has_children = false;
            for (k, v) in map.iter() {
                if k.is_attribute() {
                    let attr_name = prefixes.qualify(k);
                    let attr_value = v.as_text().unwrap_or_default();
                    start.push_attribute((attr_name.as_str(), attr_value));
                } else {
                    has_children = true;
                }
            }
            if !has_children {
                return write_event(writer, Event::Empty(start));
            }
            write_event(writer, Event::Start(start))?;
            for (k, v) in map.iter().filter(|(k, _)| !k.is_attribute()) {
                match v {
                    XmlValue::List(items) => {
                        for item in items {
                            write_element(writer, prefixes, k, item, &[])?;
                        }
                    }
                    other => write_element(writer, prefixes, k, other, &[])?,
                }
            }
            write_event(writer, Event::End(BytesEnd::new(name.as_str())))
        }
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), CodecError> {
    writer
        .write_event(event)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

// ============================================================================
// Envelope helpers
// ============================================================================

/// Slice from the first `<…:Envelope` open tag to its matching close tag.
///
/// SOAP bodies from the legacy system are often wrapped in multipart MIME
/// framing; this skips the preamble and trailing parts.
pub fn extract_envelope(data: &[u8]) -> Option<&[u8]> {
    let start = find_tag(data, b"Envelope", false)?;
    let end = start + find_tag_end(&data[start..], b"Envelope")?;
    Some(&data[start..end])
}

/// Local name of the first element inside the SOAP `Body`.
///
/// Tolerates a truncated document: parsing stops at the operation element,
/// so a head buffer that ends mid-body still yields a name, and a construct
/// left unclosed at the end of the buffer is not an error. Markup that is
/// ill-formed before the operation element is [`CodecError::InvalidXml`].
pub fn operation_name(data: &[u8]) -> Result<Option<String>, CodecError> {
    let Some(start) = find_tag(data, b"Envelope", false) else {
        return Ok(None);
    };
    let mut reader = Reader::from_reader(&data[start..]);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_body = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = e.local_name();
                if in_body {
                    return Ok(Some(String::from_utf8_lossy(local.as_ref()).into_owned()));
                }
                if local.as_ref() == b"Body" {
                    in_body = true;
                }
            }
            Ok(Event::End(ref e)) if in_body && e.local_name().as_ref() == b"Body" => return Ok(None),
            // Syntax errors here are constructs cut off by the end of the head.
            Ok(Event::Eof) | Err(quick_xml::Error::Syntax(_)) => return Ok(None),
            Err(e) => return Err(CodecError::InvalidXml(e.to_string())),
            Ok(_) => {}
        }
        buf.clear();
    }
}

/// `Envelope/Body/<operation>` of a decoded document, by local names.
pub fn envelope_body<'a>(value: &'a XmlValue, operation: &str) -> Option<&'a XmlValue> {
    value.get("Envelope")?.get("Body")?.get(operation)
}

/// Wrap singleton values of the named keys into lists, recursively.
pub fn force_list(value: XmlValue, keys: &[&str]) -> XmlValue {
    match value {
        XmlValue::Map(map) => XmlValue::Map(
            map.into_iter()
                .map(|(k, v)| {
                    let v = force_list(v, keys);
                    let forced = !k.is_attribute() && keys.contains(&k.local.as_str());
                    match v {
                        XmlValue::List(_) | XmlValue::Null => (k, v),
                        other if forced => (k, XmlValue::List(vec![other])),
                        other => (k, other),
                    }
                })
                .collect(),
        ),
        XmlValue::List(items) => {
            XmlValue::List(items.into_iter().map(|i| force_list(i, keys)).collect())
        }
        other => other,
    }
}

fn find_tag(data: &[u8], local: &[u8], closing: bool) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = data[offset..].iter().position(|b| *b == b'<') {
        let at = offset + pos;
        let mut name_start = at + 1;
        if closing {
            if data.get(name_start) != Some(&b'/') {
                offset = at + 1;
                continue;
            }
            name_start += 1;
        }
        let rest = &data[name_start.min(data.len())..];
        let name_len = rest
            .iter()
            .position(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        let name_local = name.rsplit(|b| *b == b':').next().unwrap_or(name);
        if name_local == local && !name.is_empty() {
            return Some(at);
        }
        offset = at + 1;
    }
    None
}

fn find_tag_end(data: &[u8], local: &[u8]) -> Option<usize> {
    let at = find_tag(data, local, true)?;
    let close = data[at..].iter().position(|b| *b == b'>')?;
    Some(at + close + 1)
}
