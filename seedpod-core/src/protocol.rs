//! SeedPod wire protocol: request/response envelopes, operation tables, typed calls.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::OpError;
use crate::file::{check_size, Catalog, FileId, FileMetadata};

/// Well-known port every tracker and seeder endpoint listens on.
pub const DEFAULT_PORT: u16 = 5555;

/// Operation names as they appear in `Request::operation`.
pub mod op {
    pub const PING: &str = "PING";
    pub const SEEDER_REGISTER: &str = "SEEDER_REGISTER";
    pub const SEEDER_UPDATE: &str = "SEEDER_UPDATE";
    pub const SEEDER_SIGNOUT: &str = "SEEDER_SIGNOUT";
    pub const LIST: &str = "LIST";
    pub const GET: &str = "GET";
    pub const UPLOAD: &str = "UPLOAD";
    pub const REQUEST_REPLICATE: &str = "REQUEST_REPLICATE";
}

/// Argument keys.
pub mod arg {
    pub const MESSAGE: &str = "message";
    pub const ADDRESS: &str = "address";
    pub const FILES: &str = "files";
    pub const FILE_HASH: &str = "fileHash";
    pub const FILE_SIZE: &str = "fileSize";
    pub const OFFSET: &str = "offset";
    pub const COUNT: &str = "count";
    pub const FILE: &str = "file";
    pub const FILE_DATA: &str = "fileData";
    pub const FILE_NAME: &str = "fileName";
    pub const SIZE: &str = "size";
    pub const SEEDERS: &str = "seeders";
}

/// One entry in a process's static operation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub args: &'static [&'static str],
}

impl Operation {
    /// Required keys absent from `args`.
    pub fn missing_args(&self, args: &Args) -> Vec<&'static str> {
        self.args
            .iter()
            .copied()
            .filter(|k| !args.contains_key(*k))
            .collect()
    }
}

pub const TRACKER_OPERATIONS: &[Operation] = &[
    Operation { name: op::PING, args: &[arg::MESSAGE] },
    Operation { name: op::SEEDER_REGISTER, args: &[arg::ADDRESS, arg::FILES] },
    Operation { name: op::SEEDER_UPDATE, args: &[arg::ADDRESS, arg::FILES] },
    Operation { name: op::SEEDER_SIGNOUT, args: &[arg::ADDRESS] },
    Operation { name: op::LIST, args: &[] },
    Operation { name: op::GET, args: &[arg::FILE_HASH] },
    Operation { name: op::UPLOAD, args: &[arg::FILE_HASH, arg::FILE_SIZE] },
];

pub const SEEDER_OPERATIONS: &[Operation] = &[
    Operation { name: op::PING, args: &[arg::MESSAGE] },
    Operation { name: op::GET, args: &[arg::FILE_HASH, arg::OFFSET, arg::COUNT] },
    Operation { name: op::UPLOAD, args: &[arg::FILE_HASH, arg::FILE, arg::FILE_DATA] },
    Operation {
        name: op::REQUEST_REPLICATE,
        args: &[arg::FILE_HASH, arg::FILE_NAME, arg::SIZE, arg::SEEDERS],
    },
];

pub fn find_operation(table: &'static [Operation], name: &str) -> Option<&'static Operation> {
    table.iter().find(|o| o.name == name)
}

/// Argument value carried in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Int(i64),
    Bytes(Vec<u8>),
    File(FileMetadata),
    Catalog(Catalog),
    List(Vec<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "string",
            Value::Int(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::File(_) => "file metadata",
            Value::Catalog(_) => "file catalog",
            Value::List(_) => "list",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl TryFrom<u64> for Value {
    type Error = OpError;

    fn try_from(n: u64) -> Result<Self, Self::Error> {
        i64::try_from(n)
            .map(Value::Int)
            .map_err(|_| OpError::validation(format!("{} does not fit a wire integer", n)))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<FileMetadata> for Value {
    fn from(m: FileMetadata) -> Self {
        Value::File(m)
    }
}

impl From<Catalog> for Value {
    fn from(c: Catalog) -> Self {
        Value::Catalog(c)
    }
}

pub type Args = BTreeMap<String, Value>;

/// Request envelope: `{operation, args}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub operation: String,
    pub args: Args,
}

impl Request {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            args: Args::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// Add an unsigned argument; fails when it does not fit the wire integer.
    pub fn with_uint(self, key: &str, n: u64) -> Result<Self, OpError> {
        Ok(self.with(key, Value::try_from(n)?))
    }

    pub fn ping(message: &str) -> Self {
        Self::new(op::PING).with(arg::MESSAGE, message)
    }

    pub fn register(address: Ipv4Addr, files: Catalog) -> Self {
        Self::new(op::SEEDER_REGISTER)
            .with(arg::ADDRESS, address.to_string())
            .with(arg::FILES, files)
    }

    pub fn update(address: Ipv4Addr, files: Catalog) -> Self {
        Self::new(op::SEEDER_UPDATE)
            .with(arg::ADDRESS, address.to_string())
            .with(arg::FILES, files)
    }

    pub fn signout(address: Ipv4Addr) -> Self {
        Self::new(op::SEEDER_SIGNOUT).with(arg::ADDRESS, address.to_string())
    }

    pub fn list() -> Self {
        Self::new(op::LIST)
    }

    /// Tracker `GET`: who owns `file_id`.
    pub fn locate(file_id: &FileId) -> Self {
        Self::new(op::GET).with(arg::FILE_HASH, file_id.as_str())
    }

    /// Tracker `UPLOAD`: ask for a seeder to place a new file on.
    pub fn reserve_upload(file_id: &FileId, size: u64) -> Result<Self, OpError> {
        Self::new(op::UPLOAD)
            .with(arg::FILE_HASH, file_id.as_str())
            .with_uint(arg::FILE_SIZE, size)
    }

    /// Seeder `GET`: read `count` bytes at `offset`.
    pub fn read_range(file_id: &FileId, offset: u64, count: u64) -> Result<Self, OpError> {
        Self::new(op::GET)
            .with(arg::FILE_HASH, file_id.as_str())
            .with_uint(arg::OFFSET, offset)?
            .with_uint(arg::COUNT, count)
    }

    /// Seeder `UPLOAD`: store a whole file.
    pub fn store(file_id: &FileId, file: FileMetadata, data: Vec<u8>) -> Self {
        Self::new(op::UPLOAD)
            .with(arg::FILE_HASH, file_id.as_str())
            .with(arg::FILE, file)
            .with(arg::FILE_DATA, data)
    }

    pub fn replicate(
        file_id: &FileId,
        file_name: &str,
        size: u64,
        seeders: &[Ipv4Addr],
    ) -> Result<Self, OpError> {
        Ok(Self::new(op::REQUEST_REPLICATE)
            .with(arg::FILE_HASH, file_id.as_str())
            .with(arg::FILE_NAME, file_name)
            .with_uint(arg::SIZE, size)?
            .with(
                arg::SEEDERS,
                Value::List(seeders.iter().map(|a| a.to_string()).collect()),
            ))
    }

    fn take(&mut self, key: &str) -> Result<Value, OpError> {
        self.args
            .remove(key)
            .ok_or_else(|| OpError::validation(format!("missing argument '{}'", key)))
    }

    pub fn take_text(&mut self, key: &str) -> Result<String, OpError> {
        match self.take(key)? {
            Value::Text(s) => Ok(s),
            other => Err(mistyped(key, "a string", &other)),
        }
    }

    pub fn take_uint(&mut self, key: &str) -> Result<u64, OpError> {
        match self.take(key)? {
            Value::Int(n) => u64::try_from(n)
                .map_err(|_| OpError::validation(format!("argument '{}' must not be negative", key))),
            other => Err(mistyped(key, "an integer", &other)),
        }
    }

    /// A file size or position, at most [`crate::file::MAX_FILE_SIZE`].
    pub fn take_size(&mut self, key: &str) -> Result<u64, OpError> {
        let n = self.take_uint(key)?;
        check_size(n).map_err(|e| OpError::validation(format!("argument '{}': {}", key, e)))
    }

    pub fn take_bytes(&mut self, key: &str) -> Result<Vec<u8>, OpError> {
        match self.take(key)? {
            Value::Bytes(b) => Ok(b),
            other => Err(mistyped(key, "bytes", &other)),
        }
    }

    pub fn take_file(&mut self, key: &str) -> Result<FileMetadata, OpError> {
        match self.take(key)? {
            Value::File(m) => Ok(m),
            other => Err(mistyped(key, "file metadata", &other)),
        }
    }

    pub fn take_catalog(&mut self, key: &str) -> Result<Catalog, OpError> {
        match self.take(key)? {
            Value::Catalog(c) => Ok(c),
            other => Err(mistyped(key, "a file catalog", &other)),
        }
    }

    pub fn take_file_id(&mut self, key: &str) -> Result<FileId, OpError> {
        FileId::parse(&self.take_text(key)?)
    }

    pub fn take_addresses(&mut self, key: &str) -> Result<Vec<Ipv4Addr>, OpError> {
        match self.take(key)? {
            Value::List(items) => items.iter().map(|s| parse_address(s)).collect(),
            other => Err(mistyped(key, "a list", &other)),
        }
    }
}

fn mistyped(key: &str, expected: &str, got: &Value) -> OpError {
    OpError::validation(format!(
        "argument '{}' must be {}, got {}",
        key,
        expected,
        got.type_name()
    ))
}

/// Dotted-quad validation for node addresses.
pub fn parse_address(s: &str) -> Result<Ipv4Addr, OpError> {
    s.parse::<Ipv4Addr>()
        .map_err(|_| OpError::validation(format!("invalid address '{}'", s)))
}

/// Response status codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    InternalError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::InternalError => 500,
        }
    }
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 {
        s.code()
    }
}

impl TryFrom<u16> for Status {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            200 => Ok(Status::Ok),
            400 => Ok(Status::BadRequest),
            404 => Ok(Status::NotFound),
            500 => Ok(Status::InternalError),
            other => Err(format!("unknown status {}", other)),
        }
    }
}

/// Owners of one file, as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSet {
    pub file_id: FileId,
    pub file_name: String,
    pub size: u64,
    pub owners: Vec<Ipv4Addr>,
}

/// Response message body. Each operation answers with one known shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Text(String),
    Listing(Catalog),
    /// Range read result; `count` is the number of bytes actually read.
    Chunk { data: Vec<u8>, count: u64 },
    Address(Ipv4Addr),
    Owners(OwnerSet),
}

impl Payload {
    fn shape(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Listing(_) => "listing",
            Payload::Chunk { .. } => "chunk",
            Payload::Address(_) => "address",
            Payload::Owners(_) => "owners",
        }
    }

    fn unexpected(&self, wanted: &str) -> OpError {
        OpError::Malformed(format!("expected {} payload, got {}", wanted, self.shape()))
    }

    pub fn into_text(self) -> Result<String, OpError> {
        match self {
            Payload::Text(s) => Ok(s),
            other => Err(other.unexpected("text")),
        }
    }

    pub fn into_listing(self) -> Result<Catalog, OpError> {
        match self {
            Payload::Listing(c) => Ok(c),
            other => Err(other.unexpected("listing")),
        }
    }

    pub fn into_chunk(self) -> Result<Vec<u8>, OpError> {
        match self {
            Payload::Chunk { data, count } if data.len() as u64 == count => Ok(data),
            Payload::Chunk { data, count } => Err(OpError::Malformed(format!(
                "chunk carries {} bytes but claims {}",
                data.len(),
                count
            ))),
            other => Err(other.unexpected("chunk")),
        }
    }

    pub fn into_address(self) -> Result<Ipv4Addr, OpError> {
        match self {
            Payload::Address(a) => Ok(a),
            other => Err(other.unexpected("address")),
        }
    }

    pub fn into_owners(self) -> Result<OwnerSet, OpError> {
        match self {
            Payload::Owners(o) => Ok(o),
            other => Err(other.unexpected("owners")),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.write_str(s),
            Payload::Listing(c) => write!(f, "<{} files>", c.len()),
            Payload::Chunk { count, .. } => write!(f, "<{} bytes>", count),
            Payload::Address(a) => write!(f, "{}", a),
            Payload::Owners(o) => write!(f, "<{} owners of {}>", o.owners.len(), o.file_id),
        }
    }
}

/// Response envelope: `{status, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: Payload,
}

impl Response {
    pub fn ok(message: Payload) -> Self {
        Self {
            status: Status::Ok,
            message,
        }
    }

    pub fn text(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Payload::Text(message.into()),
        }
    }

    pub fn from_error(e: &OpError) -> Self {
        Self::text(e.status(), e.to_string())
    }

    pub fn from_result(result: Result<Payload, OpError>) -> Self {
        match result {
            Ok(p) => Self::ok(p),
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Payload of a 200, otherwise `OpError::Remote`.
    pub fn into_result(self) -> Result<Payload, OpError> {
        if self.is_ok() {
            Ok(self.message)
        } else {
            Err(OpError::Remote {
                status: self.status,
                message: self.message.to_string(),
            })
        }
    }
}

/// Operations a tracker understands, with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    Ping { message: String },
    Register { address: String, files: Catalog },
    Update { address: String, files: Catalog },
    Signout { address: String },
    List,
    Locate { file_id: FileId },
    ReserveUpload { file_id: FileId, size: u64 },
}

impl TrackerCall {
    pub fn parse(mut req: Request) -> Result<Self, OpError> {
        let operation = std::mem::take(&mut req.operation);
        Ok(match operation.as_str() {
            op::PING => TrackerCall::Ping {
                message: req.take_text(arg::MESSAGE)?,
            },
            op::SEEDER_REGISTER => TrackerCall::Register {
                address: req.take_text(arg::ADDRESS)?,
                files: req.take_catalog(arg::FILES)?,
            },
            op::SEEDER_UPDATE => TrackerCall::Update {
                address: req.take_text(arg::ADDRESS)?,
                files: req.take_catalog(arg::FILES)?,
            },
            op::SEEDER_SIGNOUT => TrackerCall::Signout {
                address: req.take_text(arg::ADDRESS)?,
            },
            op::LIST => TrackerCall::List,
            op::GET => TrackerCall::Locate {
                file_id: req.take_file_id(arg::FILE_HASH)?,
            },
            op::UPLOAD => TrackerCall::ReserveUpload {
                file_id: req.take_file_id(arg::FILE_HASH)?,
                size: req.take_size(arg::FILE_SIZE)?,
            },
            _ => return Err(OpError::UnknownOperation(operation)),
        })
    }
}

/// Operations a seeder understands, with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeederCall {
    Ping {
        message: String,
    },
    ReadRange {
        file_id: FileId,
        offset: u64,
        count: u64,
    },
    Store {
        file_id: FileId,
        file: FileMetadata,
        data: Vec<u8>,
    },
    Replicate {
        file_id: FileId,
        file_name: String,
        size: u64,
        sources: Vec<Ipv4Addr>,
    },
}

impl SeederCall {
    pub fn parse(mut req: Request) -> Result<Self, OpError> {
        let operation = std::mem::take(&mut req.operation);
        Ok(match operation.as_str() {
            op::PING => SeederCall::Ping {
                message: req.take_text(arg::MESSAGE)?,
            },
            op::GET => SeederCall::ReadRange {
                file_id: req.take_file_id(arg::FILE_HASH)?,
                offset: req.take_size(arg::OFFSET)?,
                count: req.take_uint(arg::COUNT)?,
            },
            op::UPLOAD => SeederCall::Store {
                file_id: req.take_file_id(arg::FILE_HASH)?,
                file: req.take_file(arg::FILE)?,
                data: req.take_bytes(arg::FILE_DATA)?,
            },
            op::REQUEST_REPLICATE => SeederCall::Replicate {
                file_id: req.take_file_id(arg::FILE_HASH)?,
                file_name: req.take_text(arg::FILE_NAME)?,
                size: req.take_size(arg::SIZE)?,
                sources: req.take_addresses(arg::SEEDERS)?,
            },
            _ => return Err(OpError::UnknownOperation(operation)),
        })
    }
}
