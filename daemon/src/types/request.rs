//! Process request types.
//!
//! A [`ProcessRequest`] describes a chain of audio transformations applied to
//! a [`Source`], which is either a literal file, a list of sources to
//! concatenate, or another request whose result becomes the source.
//! Requests are parsed from JSON and validated here, before any registry or
//! cache interaction.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{DaemonError, Result};

use super::signature::{signature, Signature};

/// Extensions the sound I/O layer can read as literal sources.
pub const SUPPORTED_SOURCE_EXTENSIONS: [&str; 1] = ["wav"];

/// Longest accepted `cache` duration, in hours (100 years).
pub const MAX_CACHE_HOURS: f64 = 876_000.0;

/// Dispatch mode of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Block until the artifact is ready.
    #[default]
    Sync,
    /// Start the job and answer `wait` immediately.
    Async,
    /// Only compute the signature.
    Hash,
}

impl Mode {
    /// Parses a mode from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Mode::Sync),
            "async" => Some(Mode::Async),
            "hash" => Some(Mode::Hash),
            _ => None,
        }
    }
}

/// How long an artifact stays valid in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CachePolicy {
    /// The artifact never expires.
    #[default]
    Forever,
    /// The artifact expires this many hours after its last access.
    Hours(f64),
}

impl CachePolicy {
    /// Parses the `cache` field: null/true never expires, false is one hour,
    /// a positive number is a duration in hours.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) | Some(Value::Bool(true)) => Ok(CachePolicy::Forever),
            Some(Value::Bool(false)) => Ok(CachePolicy::Hours(1.0)),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(h) if h > 0.0 && h <= MAX_CACHE_HOURS => Ok(CachePolicy::Hours(h)),
                _ => Err(DaemonError::invalid_request(format!(
                    "'cache' must be a positive number of hours up to {} (got {})",
                    MAX_CACHE_HOURS, n
                ))),
            },
            Some(other) => Err(DaemonError::invalid_request(format!(
                "'cache' must be null, a boolean or a number (got {})",
                other
            ))),
        }
    }

    /// Resolves the policy into a concrete expiration, starting now.
    pub fn expiration(&self) -> Option<Expiration> {
        match self {
            CachePolicy::Forever => None,
            CachePolicy::Hours(h) => Some(Expiration::starting_now(*h)),
        }
    }
}

/// A concrete expiry date together with the renewal period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Expiration {
    /// When the artifact expires.
    #[serde(with = "system_time_serde")]
    pub expires_at: SystemTime,
    /// Hours added to the current time on each renewal.
    pub renew_hours: f64,
}

impl Expiration {
    /// Creates an expiration `hours` from now, capped at [`MAX_CACHE_HOURS`].
    pub fn starting_now(hours: f64) -> Self {
        let now = SystemTime::now();
        let longest = Duration::from_secs(MAX_CACHE_HOURS as u64 * 3600);
        let period = Duration::try_from_secs_f64(hours * 3600.0)
            .unwrap_or(if hours > 0.0 { longest } else { Duration::ZERO })
            .min(longest);
        Self {
            expires_at: now.checked_add(period).unwrap_or(now),
            renew_hours: hours,
        }
    }

    /// Pushes the expiry date to `renew_hours` from now.
    pub fn renewed(&self) -> Self {
        Self::starting_now(self.renew_hours)
    }

    /// Returns true if the expiry date is in the past.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }
}

/// One item of a processing stack: a module name and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInvocation {
    /// Registered module name.
    pub module: String,
    /// All other keys of the invocation object.
    pub params: Map<String, Value>,
}

impl ModuleInvocation {
    /// Parses an invocation object; `position` is used in error messages.
    pub fn from_value(value: &Value, position: usize) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            DaemonError::invalid_request(format!(
                "Item {} of the stack is not an object: {}",
                position, value
            ))
        })?;
        let module = match object.get("module") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                return Err(DaemonError::invalid_request(format!(
                    "Item {} of the stack does not have a 'module' defined: {}",
                    position, value
                )))
            }
        };
        let params = object
            .iter()
            .filter(|(k, _)| k.as_str() != "module")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self { module, params })
    }

    /// Returns the invocation as a JSON object, `module` key included.
    pub fn to_value(&self) -> Value {
        let mut object = self.params.clone();
        object.insert("module".to_string(), Value::String(self.module.clone()));
        Value::Object(object)
    }
}

/// An ordered list of module invocations.
pub type Stack = Vec<ModuleInvocation>;

/// Serializes a stack for signatures and job files.
pub fn stack_to_value(stack: &[ModuleInvocation]) -> Value {
    Value::Array(stack.iter().map(ModuleInvocation::to_value).collect())
}

/// The input of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// An absolute, normalized path to an existing sound file.
    Literal(PathBuf),
    /// Sources concatenated along time.
    List(Vec<Source>),
    /// A nested request, resolved first.
    Query(Box<ProcessRequest>),
}

impl Source {
    /// Parses the `file` field.
    pub fn from_value(value: &Value, defaults: &RequestDefaults) -> Result<Self> {
        match value {
            Value::String(path) if !path.is_empty() => Ok(Source::Literal(absolutize(Path::new(path))?)),
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(DaemonError::invalid_request("'file' list cannot be empty"));
                }
                items
                    .iter()
                    .map(|item| Source::from_value(item, defaults))
                    .collect::<Result<Vec<_>>>()
                    .map(Source::List)
            }
            Value::Object(_) => {
                ProcessRequest::from_value(value, defaults).map(|r| Source::Query(Box::new(r)))
            }
            other => Err(DaemonError::invalid_request(format!(
                "'file' must be a path, a list or a query (got {})",
                other
            ))),
        }
    }

    /// Signature of this source on its own, used for list elements and the
    /// concatenation cache.
    pub fn signature(&self, default_format: &str) -> Signature {
        match self {
            Source::Literal(path) => signature(&json!(["file", path_str(path), []])),
            Source::List(items) => concat_signature(
                &items
                    .iter()
                    .map(|item| item.signature(default_format))
                    .collect::<Vec<_>>(),
            ),
            Source::Query(request) => request.signature(default_format),
        }
    }

    /// Checks that every literal path, at any depth, is readable and has a
    /// supported extension.
    pub fn check_access(&self) -> Result<()> {
        match self {
            Source::Literal(path) => check_source_file(path),
            Source::List(items) => items.iter().try_for_each(Source::check_access),
            Source::Query(request) => request.file.check_access(),
        }
    }

    /// Collects every literal path, at any depth.
    pub fn literal_paths(&self, out: &mut Vec<PathBuf>) {
        match self {
            Source::Literal(path) => out.push(path.clone()),
            Source::List(items) => items.iter().for_each(|item| item.literal_paths(out)),
            Source::Query(request) => request.file.literal_paths(out),
        }
    }

    /// Returns the nesting depth of queries below this source.
    pub fn query_depth(&self) -> usize {
        match self {
            Source::Literal(_) => 0,
            Source::List(items) => items.iter().map(Source::query_depth).max().unwrap_or(0),
            Source::Query(request) => 1 + request.file.query_depth(),
        }
    }
}

/// Signature of the concatenation of sources with the given signatures.
pub fn concat_signature(elements: &[Signature]) -> Signature {
    let sigs: Vec<&str> = elements.iter().map(Signature::as_str).collect();
    signature(&json!(["list", sigs, []]))
}

/// Values inherited by nested requests.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    /// Cache policy of the enclosing request.
    pub cache: CachePolicy,
}

/// A parsed and normalized `process` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    /// The input.
    pub file: Source,
    /// Modules applied in order to the resolved input.
    pub stack: Stack,
    /// Dispatch mode.
    pub mode: Mode,
    /// Requested output extension. None means the cache format.
    pub format: Option<String>,
    /// Encoder options for the output.
    pub format_options: Value,
    /// Expiration policy of the artifact.
    pub cache: CachePolicy,
}

impl ProcessRequest {
    /// Parses and validates a request object.
    ///
    /// Relative paths are made absolute against the current directory. When
    /// `file` is a list and `stack` a list of stacks, each element is wrapped
    /// into a nested query carrying its own stack.
    pub fn from_value(value: &Value, defaults: &RequestDefaults) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| DaemonError::invalid_request("The request must be a JSON object"))?;

        let mode = match object.get("mode") {
            None | Some(Value::Null) => Mode::Sync,
            Some(Value::String(s)) => Mode::parse(s).ok_or_else(|| {
                DaemonError::invalid_request(format!(
                    "'mode' must be one of sync, async or hash (got '{}')",
                    s
                ))
            })?,
            Some(other) => {
                return Err(DaemonError::invalid_request(format!(
                    "'mode' must be a string (got {})",
                    other
                )))
            }
        };

        let cache = match object.get("cache") {
            None => defaults.cache,
            value => CachePolicy::from_value(value)?,
        };
        let nested_defaults = RequestDefaults { cache };

        let format = match object.get("format") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if is_valid_format(s.trim_start_matches('.')) => {
                Some(s.trim_start_matches('.').to_lowercase())
            }
            Some(other) => {
                return Err(DaemonError::invalid_request(format!(
                    "'format' must be a plain file extension other than 'job' (got {})",
                    other
                )))
            }
        };
        let format_options = object.get("format_options").cloned().unwrap_or(Value::Null);

        let file_value = object
            .get("file")
            .ok_or_else(|| DaemonError::invalid_request("The 'file' field is missing"))?;
        let file = Source::from_value(file_value, &nested_defaults)?;

        let (file, stack) = match StackSpec::from_value(object.get("stack"))? {
            StackSpec::Flat(stack) => (file, stack),
            StackSpec::PerElement(stacks) => (distribute_stacks(file, stacks, cache)?, Vec::new()),
        };

        Ok(Self {
            file,
            stack,
            mode,
            format,
            format_options,
            cache,
        })
    }

    /// Returns the output extension, falling back to the cache format.
    pub fn effective_format<'a>(&'a self, default_format: &'a str) -> &'a str {
        self.format.as_deref().unwrap_or(default_format)
    }

    /// Deterministic job signature.
    ///
    /// Covers the kind of source (literal path, element signatures, or nested
    /// signature), the stack, and the output encoding.
    pub fn signature(&self, default_format: &str) -> Signature {
        let (kind, basis) = match &self.file {
            Source::Literal(path) => ("file", Value::String(path_str(path))),
            Source::List(items) => (
                "list",
                Value::Array(
                    items
                        .iter()
                        .map(|item| Value::String(item.signature(default_format).into_string()))
                        .collect(),
                ),
            ),
            Source::Query(request) => (
                "query",
                Value::String(request.signature(default_format).into_string()),
            ),
        };
        signature(&json!([
            kind,
            basis,
            stack_to_value(&self.stack),
            self.effective_format(default_format),
            self.format_options,
        ]))
    }

    /// Returns a copy dispatched in forced-sync mode, as nested queries are.
    pub fn as_sync(&self) -> Self {
        Self {
            mode: Mode::Sync,
            ..self.clone()
        }
    }
}

/// The `stack` field: one stack, or one stack per list element.
#[derive(Debug, Clone, PartialEq)]
pub enum StackSpec {
    /// Applied to the resolved source.
    Flat(Stack),
    /// Applied element-wise to a list source before concatenation.
    PerElement(Vec<Stack>),
}

impl StackSpec {
    /// Parses the `stack` field. Absent or null means an empty stack.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        let items = match value {
            None | Some(Value::Null) => return Ok(StackSpec::Flat(Vec::new())),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(DaemonError::invalid_request(format!(
                    "'stack' must be a list (got {})",
                    other
                )))
            }
        };

        if !items.is_empty() && items.iter().all(Value::is_array) {
            let stacks = items
                .iter()
                .map(|inner| parse_stack(inner.as_array().map(Vec::as_slice).unwrap_or_default()))
                .collect::<Result<Vec<_>>>()?;
            return Ok(StackSpec::PerElement(stacks));
        }
        if items.iter().any(Value::is_array) {
            return Err(DaemonError::invalid_request(
                "'stack' cannot mix module invocations and lists of invocations",
            ));
        }
        parse_stack(items).map(StackSpec::Flat)
    }
}

fn parse_stack(items: &[Value]) -> Result<Stack> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| ModuleInvocation::from_value(item, i))
        .collect()
}

/// Wraps each list element into a nested query with its own stack.
fn distribute_stacks(file: Source, stacks: Vec<Stack>, cache: CachePolicy) -> Result<Source> {
    let items = match file {
        Source::List(items) => items,
        _ => {
            return Err(DaemonError::invalid_request(
                "A list of stacks requires 'file' to be a list",
            ))
        }
    };

    let stacks: Vec<Stack> = match stacks.len() {
        0 => return Ok(Source::List(items)),
        1 => vec![stacks[0].clone(); items.len()],
        n if n == items.len() => stacks,
        n => {
            return Err(DaemonError::invalid_request(format!(
                "'stack' has {} stacks but 'file' has {} elements",
                n,
                items.len()
            )))
        }
    };

    let items = items
        .into_iter()
        .zip(stacks)
        .map(|(item, stack)| {
            if stack.is_empty() {
                item
            } else {
                Source::Query(Box::new(ProcessRequest {
                    file: item,
                    stack,
                    mode: Mode::Sync,
                    format: None,
                    format_options: Value::Null,
                    cache,
                }))
            }
        })
        .collect();
    Ok(Source::List(items))
}

/// Checks read access and extension of a literal source.
pub fn check_source_file(path: &Path) -> Result<()> {
    if std::fs::File::open(path).is_err() || !path.is_file() {
        return Err(DaemonError::source_unavailable(path));
    }
    let ext = extension_of(path);
    if !SUPPORTED_SOURCE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DaemonError::unsupported_format(format!(
            "File '{}' has an unsupported format '{}' (supported: {})",
            path.display(),
            ext,
            SUPPORTED_SOURCE_EXTENSIONS.join(", ")
        )));
    }
    Ok(())
}

/// An output format is a plain alphanumeric extension, never the sidecar's.
fn is_valid_format(format: &str) -> bool {
    !format.is_empty()
        && format.chars().all(|c| c.is_ascii_alphanumeric())
        && !format.eq_ignore_ascii_case("job")
}

/// Lowercased extension of a path, empty if none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

/// Makes a path absolute and removes `.` and `..` components lexically.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| DaemonError::io("resolve current directory for", path, e))?;
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Custom serde implementation for SystemTime as Unix seconds.
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn parse(value: Value) -> Result<ProcessRequest> {
        ProcessRequest::from_value(&value, &RequestDefaults::default())
    }

    #[test]
    fn defaults_applied() {
        let req = parse(json!({ "file": "/data/a.wav" })).unwrap();
        assert_eq!(req.mode, Mode::Sync);
        assert!(req.stack.is_empty());
        assert_eq!(req.cache, CachePolicy::Forever);
        assert_eq!(req.effective_format("wav"), "wav");
        assert_eq!(req.file, Source::Literal(PathBuf::from("/data/a.wav")));
    }

    #[test]
    fn paths_are_normalized() {
        let req = parse(json!({ "file": "/data/./x/../a.wav" })).unwrap();
        assert_eq!(req.file, Source::Literal(PathBuf::from("/data/a.wav")));
    }

    #[test]
    fn missing_file_rejected() {
        let err = parse(json!({ "stack": [] })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn invalid_mode_rejected() {
        let err = parse(json!({ "file": "/a.wav", "mode": "later" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert!(err.message.contains("later"));
    }

    #[test]
    fn stack_item_without_module_rejected() {
        let err = parse(json!({ "file": "/a.wav", "stack": [{ "before": 1 }] })).unwrap_err();
        assert!(err.message.contains("Item 0"));
    }

    #[test]
    fn cache_policy_values() {
        assert_eq!(CachePolicy::from_value(None).unwrap(), CachePolicy::Forever);
        assert_eq!(CachePolicy::from_value(Some(&json!(true))).unwrap(), CachePolicy::Forever);
        assert_eq!(CachePolicy::from_value(Some(&json!(false))).unwrap(), CachePolicy::Hours(1.0));
        assert_eq!(CachePolicy::from_value(Some(&json!(12))).unwrap(), CachePolicy::Hours(12.0));
        assert!(CachePolicy::from_value(Some(&json!(-1))).is_err());
        assert!(CachePolicy::from_value(Some(&json!("soon"))).is_err());
    }

    #[test]
    fn cache_hours_are_bounded() {
        assert_eq!(
            CachePolicy::from_value(Some(&json!(MAX_CACHE_HOURS))).unwrap(),
            CachePolicy::Hours(MAX_CACHE_HOURS)
        );
        let err = CachePolicy::from_value(Some(&json!(1e300))).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert!(parse(json!({ "file": "/a.wav", "cache": 1e300 })).is_err());
    }

    #[test]
    fn oversized_expiration_saturates() {
        // A hand-edited job file may carry any renewal period.
        let far = Expiration::starting_now(1e300);
        assert!(far.expires_at > SystemTime::now() + Duration::from_secs(3600 * 24 * 365 * 99));
        assert!(!far.renewed().is_expired(SystemTime::now()));

        let broken = Expiration::starting_now(f64::NAN);
        assert!(broken.expires_at <= SystemTime::now());
    }

    #[test]
    fn empty_list_rejected() {
        assert!(parse(json!({ "file": [] })).is_err());
    }

    #[test]
    fn per_element_stacks_must_match() {
        let err = parse(json!({
            "file": ["/a.wav", "/b.wav", "/c.wav"],
            "stack": [[{ "module": "pad" }], []]
        }))
        .unwrap_err();
        assert!(err.message.contains("2 stacks"));
    }

    #[test]
    fn per_element_stack_broadcast() {
        let req = parse(json!({
            "file": ["/a.wav", "/b.wav"],
            "stack": [[{ "module": "time-reverse" }]]
        }))
        .unwrap();
        assert!(req.stack.is_empty());
        match req.file {
            Source::List(items) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|i| matches!(i, Source::Query(_))));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn per_element_stacks_need_list_file() {
        let err = parse(json!({ "file": "/a.wav", "stack": [[{ "module": "pad" }]] })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn nested_query_inherits_cache_policy() {
        let req = parse(json!({ "file": { "file": "/a.wav" }, "cache": 5 })).unwrap();
        match req.file {
            Source::Query(inner) => assert_eq!(inner.cache, CachePolicy::Hours(5.0)),
            other => panic!("expected query, got {:?}", other),
        }
    }

    #[test]
    fn query_depth_counts_nesting() {
        let req = parse(json!({ "file": { "file": { "file": "/a.wav" } } })).unwrap();
        assert_eq!(req.file.query_depth(), 2);
    }

    #[test]
    fn invocation_round_trips_module_key() {
        let inv = ModuleInvocation::from_value(&json!({ "module": "pad", "before": 0.5 }), 0).unwrap();
        assert_eq!(inv.module, "pad");
        assert!(!inv.params.contains_key("module"));
        assert_eq!(inv.to_value()["module"], "pad");
    }

    #[test]
    fn expiration_renewal_moves_forward() {
        let exp = Expiration {
            expires_at: SystemTime::UNIX_EPOCH,
            renew_hours: 2.0,
        };
        assert!(exp.is_expired(SystemTime::now()));
        let renewed = exp.renewed();
        assert!(!renewed.is_expired(SystemTime::now()));
        assert_eq!(renewed.renew_hours, 2.0);
    }
}
