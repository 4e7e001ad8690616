//! Decoded object values and the object streaming format
//!
//! Key payloads hold a single object streamed by its class. Objects nested
//! in collections are preceded by a class tag: either a new class name or a
//! reference to a class seen earlier in the same key buffer. Each streamed
//! object starts with a byte count (flagged with [`K_BYTE_COUNT_MASK`]) and a
//! class version, which lets readers skip classes they do not model.
//!
//! Only a closed set of classes is decoded into typed values; anything else
//! comes back as [`Value::Raw`] with its streamed body.

use crate::buffer::{RBuffer, WBuffer};
use crate::error::{Result, RootError};
use crate::streamer::StreamerInfo;
use std::collections::HashMap;
use std::sync::Arc;

/// Flag marking a 32-bit word as a byte count
pub const K_BYTE_COUNT_MASK: u32 = 0x4000_0000;

/// Class tag announcing a new class name
pub const K_NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;

/// Flag marking a tag as a class reference
pub const K_CLASS_MASK: u32 = 0x8000_0000;

/// Bias added to buffer positions used as reference tags
pub const K_MAP_OFFSET: i64 = 2;

/// Version flag meaning the version word is followed by a checksum
const K_BYTE_COUNT_VMASK: u16 = 0x4000;

/// TObject bit: object has a process ID reference attached
const K_IS_REFERENCED: u32 = 1 << 4;

/// TObject bits written for new objects (not deleted, on heap)
const K_DEFAULT_BITS: u32 = 0x0300_0000;

/// Longest class name accepted in a class tag
const MAX_CLASS_NAME: usize = 80;

/// Deepest chain of objects nested inside containers accepted on read
const MAX_NESTING: usize = 64;

const TOBJECT_VERSION: i16 = 1;
const TNAMED_VERSION: i16 = 1;
const TOBJSTRING_VERSION: i16 = 1;
const TLIST_VERSION: i16 = 5;
const TOBJARRAY_VERSION: i16 = 3;
const TSTREAMERINFO_VERSION: i16 = 9;

/// Object with a name and a title
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Named {
    pub name: String,
    pub title: String,
}

/// Doubly linked list of objects
#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    pub name: String,
    pub items: Vec<Value>,
}

/// An object decoded from a key payload
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    List(List),
    StreamerInfo(Arc<StreamerInfo>),
    Named(Named),
    ObjString(String),
    /// Class without a typed model; `data` is its streamed body
    Raw { class: String, data: Vec<u8> },
}

impl Value {
    /// Class name used when the value is streamed
    pub fn class(&self) -> &str {
        match self {
            Value::List(_) => "TList",
            Value::StreamerInfo(_) => "TStreamerInfo",
            Value::Named(_) => "TNamed",
            Value::ObjString(_) => "TObjString",
            Value::Raw { class, .. } => class,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_streamer_info(&self) -> Option<&Arc<StreamerInfo>> {
        match self {
            Value::StreamerInfo(si) => Some(si),
            _ => None,
        }
    }
}

/// Decode the object of class `class` stored in a key payload
///
/// `displacement` is the key length: the payload's position inside the key
/// record, which reference tags are relative to.
pub fn decode(class: &str, payload: &[u8], displacement: i64) -> Result<Value> {
    let mut r = RBuffer::with_offset(payload, displacement);
    let mut refs = ReadRefs::default();
    let end = Some(payload.len());
    let value = read_value(&mut r, class, &mut refs, end)?;
    r.err()?;
    Ok(value)
}

/// Encode a value as a key payload starting at `displacement`
pub fn encode(value: &Value, displacement: i64) -> Result<Vec<u8>> {
    let mut w = WBuffer::with_offset(displacement);
    let mut refs = WriteRefs::default();
    write_value(&mut w, value, &mut refs);
    w.into_bytes()
}

#[derive(Default)]
struct ReadRefs {
    classes: HashMap<i64, String>,
    objects: HashMap<i64, Value>,
    depth: usize,
}

#[derive(Default)]
struct WriteRefs {
    classes: HashMap<String, u32>,
}

/// Byte-count frame opened by [`read_version`]
#[derive(Debug, Clone, Copy)]
struct Frame {
    start: usize,
    count: usize,
}

fn read_version(r: &mut RBuffer<'_>) -> (i16, Option<Frame>) {
    let start = r.pos();
    let bcnt = r.read_u32();
    if bcnt & K_BYTE_COUNT_MASK != 0 {
        let version = r.read_i16();
        let frame = Frame {
            start,
            count: (bcnt & !K_BYTE_COUNT_MASK) as usize,
        };
        (version, Some(frame))
    } else {
        r.set_pos(start);
        (r.read_i16(), None)
    }
}

/// Move to the end of a frame, skipping fields this crate does not model
fn close_read_frame(r: &mut RBuffer<'_>, frame: Option<Frame>, class: &str) -> Result<()> {
    r.err()?;
    if let Some(frame) = frame {
        let end = frame.start + 4 + frame.count;
        if r.pos() > end {
            return Err(RootError::Format(format!(
                "{} read {} bytes past its byte count",
                class,
                r.pos() - end
            )));
        }
        r.set_pos(end);
    }
    r.err()
}

fn write_version(w: &mut WBuffer, version: i16) -> usize {
    let pos = w.len();
    w.write_u32(0);
    w.write_i16(version);
    pos
}

fn close_write_frame(w: &mut WBuffer, pos: usize) {
    let count = (w.len() - pos - 4) as u32;
    w.patch_u32(pos, count | K_BYTE_COUNT_MASK);
}

fn read_tobject(r: &mut RBuffer<'_>) {
    let version = r.read_i16();
    if version as u16 & K_BYTE_COUNT_VMASK != 0 {
        r.skip(4);
    }
    let _unique_id = r.read_u32();
    let bits = r.read_u32();
    if bits & K_IS_REFERENCED != 0 {
        let _pid = r.read_u16();
    }
}

fn write_tobject(w: &mut WBuffer) {
    w.write_i16(TOBJECT_VERSION);
    w.write_u32(0);
    w.write_u32(K_DEFAULT_BITS);
}

fn read_named(r: &mut RBuffer<'_>) -> Result<Named> {
    let (_, frame) = read_version(r);
    read_tobject(r);
    let name = r.read_string();
    let title = r.read_string();
    close_read_frame(r, frame, "TNamed")?;
    Ok(Named { name, title })
}

fn write_named(w: &mut WBuffer, name: &str, title: &str) {
    let pos = write_version(w, TNAMED_VERSION);
    write_tobject(w);
    w.write_string(name);
    w.write_string(title);
    close_write_frame(w, pos);
}

fn read_streamer_info(r: &mut RBuffer<'_>) -> Result<StreamerInfo> {
    let (_, frame) = read_version(r);
    let named = read_named(r)?;
    let checksum = r.read_u32();
    let class_version = r.read_i32();
    // element array skipped through the byte count
    close_read_frame(r, frame, "TStreamerInfo")?;
    Ok(StreamerInfo {
        name: named.name,
        title: named.title,
        checksum,
        class_version,
    })
}

fn write_streamer_info(w: &mut WBuffer, si: &StreamerInfo, refs: &mut WriteRefs) {
    let pos = write_version(w, TSTREAMERINFO_VERSION);
    write_named(w, &si.name, &si.title);
    w.write_u32(si.checksum);
    w.write_i32(si.class_version);
    write_tagged(w, "TObjArray", refs, |w, _| {
        let pos = write_version(w, TOBJARRAY_VERSION);
        write_tobject(w);
        w.write_string("");
        w.write_i32(0); // entries
        w.write_i32(0); // lower bound
        close_write_frame(w, pos);
    });
    close_write_frame(w, pos);
}

fn read_list(r: &mut RBuffer<'_>, refs: &mut ReadRefs) -> Result<List> {
    let (version, frame) = read_version(r);
    if version <= 3 {
        return Err(RootError::Format(format!(
            "unsupported TList version {}",
            version
        )));
    }
    read_tobject(r);
    let name = r.read_string();
    let nobjs = r.read_i32();
    r.err()?;
    if nobjs < 0 {
        return Err(RootError::Format(format!("negative TList size {}", nobjs)));
    }

    let mut items = Vec::with_capacity((nobjs as usize).min(r.remaining()));
    for _ in 0..nobjs {
        if let Some(obj) = read_object_any(r, refs)? {
            items.push(obj);
        }
        if version > 4 {
            let nopt = r.read_u8() as usize;
            r.skip(nopt);
        }
    }
    close_read_frame(r, frame, "TList")?;
    Ok(List { name, items })
}

fn write_list(w: &mut WBuffer, list: &List, refs: &mut WriteRefs) {
    let pos = write_version(w, TLIST_VERSION);
    write_tobject(w);
    w.write_string(&list.name);
    w.write_i32(list.items.len() as i32);
    for item in &list.items {
        write_object_any(w, item, refs);
        w.write_u8(0); // option
    }
    close_write_frame(w, pos);
}

fn read_value(
    r: &mut RBuffer<'_>,
    class: &str,
    refs: &mut ReadRefs,
    end: Option<usize>,
) -> Result<Value> {
    let value = match class {
        "TList" => Value::List(read_list(r, refs)?),
        "TStreamerInfo" => Value::StreamerInfo(Arc::new(read_streamer_info(r)?)),
        "TNamed" => Value::Named(read_named(r)?),
        "TObjString" => {
            let (_, frame) = read_version(r);
            read_tobject(r);
            let s = r.read_string();
            close_read_frame(r, frame, class)?;
            Value::ObjString(s)
        }
        _ => {
            let Some(end) = end else {
                return Err(RootError::Format(format!(
                    "cannot skip class {} streamed without a byte count",
                    class
                )));
            };
            let start = r.pos();
            if end < start {
                return Err(RootError::Format(format!("empty body for class {}", class)));
            }
            Value::Raw {
                class: class.to_string(),
                data: r.read_bytes(end - start).to_vec(),
            }
        }
    };
    r.err()?;
    Ok(value)
}

fn write_value(w: &mut WBuffer, value: &Value, refs: &mut WriteRefs) {
    match value {
        Value::List(list) => write_list(w, list, refs),
        Value::StreamerInfo(si) => write_streamer_info(w, si, refs),
        Value::Named(named) => write_named(w, &named.name, &named.title),
        Value::ObjString(s) => {
            let pos = write_version(w, TOBJSTRING_VERSION);
            write_tobject(w);
            w.write_string(s);
            close_write_frame(w, pos);
        }
        Value::Raw { data, .. } => w.write_bytes(data),
    }
}

/// Read a class-tagged object; `None` for a null pointer
fn read_object_any(r: &mut RBuffer<'_>, refs: &mut ReadRefs) -> Result<Option<Value>> {
    let beg_local = r.pos();
    let beg = r.abs_pos();
    let bcnt = r.read_u32();

    let (tag, count, start) = if bcnt & K_BYTE_COUNT_MASK == 0 || bcnt == K_NEW_CLASS_TAG {
        (bcnt, None, 0)
    } else {
        let start = r.abs_pos();
        let tag = r.read_u32();
        (tag, Some((bcnt & !K_BYTE_COUNT_MASK) as usize), start)
    };
    r.err()?;
    let end = count.map(|n| beg_local + 4 + n);

    if tag & K_CLASS_MASK == 0 {
        if tag == 0 || tag == 1 {
            return Ok(None);
        }
        let obj = refs.objects.get(&(tag as i64)).cloned().ok_or_else(|| {
            RootError::Format(format!("unknown object reference {:#x} at {}", tag, beg))
        })?;
        if let Some(end) = end {
            r.set_pos(end);
        }
        r.err()?;
        return Ok(Some(obj));
    }

    let class = if tag == K_NEW_CLASS_TAG {
        let name = r.read_cstring(MAX_CLASS_NAME);
        let key = if count.is_some() {
            start + K_MAP_OFFSET
        } else {
            refs.classes.len() as i64 + 1
        };
        refs.classes.insert(key, name.clone());
        name
    } else {
        let key = (tag & !K_CLASS_MASK) as i64;
        refs.classes.get(&key).cloned().ok_or_else(|| {
            RootError::Format(format!("unknown class reference {:#x} at {}", tag, beg))
        })?
    };
    r.err()?;

    if refs.depth >= MAX_NESTING {
        return Err(RootError::Format(format!(
            "object nesting too deep ({} levels) at {}",
            refs.depth, beg
        )));
    }
    refs.depth += 1;
    let value = read_value(r, &class, refs, end);
    refs.depth -= 1;
    let value = value?;
    if let Some(end) = end {
        if r.pos() > end {
            return Err(RootError::Format(format!(
                "{} read past its byte count",
                class
            )));
        }
        r.set_pos(end);
        refs.objects.insert(beg + K_MAP_OFFSET, value.clone());
    }
    r.err()?;
    Ok(Some(value))
}

/// Write a byte count, a class tag, then the body produced by `body`
fn write_tagged<F>(w: &mut WBuffer, class: &str, refs: &mut WriteRefs, body: F)
where
    F: FnOnce(&mut WBuffer, &mut WriteRefs),
{
    let pos = w.len();
    w.write_u32(0);
    match refs.classes.get(class) {
        Some(&tag) => w.write_u32(tag | K_CLASS_MASK),
        None => {
            let tag = (w.abs_pos() + K_MAP_OFFSET) as u32;
            w.write_u32(K_NEW_CLASS_TAG);
            w.write_cstring(class);
            refs.classes.insert(class.to_string(), tag);
        }
    }
    body(w, refs);
    close_write_frame(w, pos);
}

fn write_object_any(w: &mut WBuffer, value: &Value, refs: &mut WriteRefs) {
    write_tagged(w, value.class(), refs, |w, refs| write_value(w, value, refs));
}
