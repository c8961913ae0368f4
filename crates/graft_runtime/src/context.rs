//! Request and field contexts.

use crate::batch::{BatchScheduler, ContextToken, NoopBatchScheduler};
use crate::dataloader::{BatchLoader, DataLoader, LoadError, LoaderRegistry, LoaderScope};
use crate::resolver::ResolverArgs;
use graft_core::Path;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Coerced request variables.
pub type Variables = serde_json::Map<String, Value>;

/// Request-scoped values keyed by their type.
///
/// # Example
///
/// ```
/// use graft_runtime::RequestData;
///
/// struct UserId(String);
///
/// let data = RequestData::new().with(UserId("123".into()));
/// assert_eq!(data.get::<UserId>().unwrap().0, "123");
/// ```
#[derive(Default)]
pub struct RequestData {
    data: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestData {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.data
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|boxed| boxed.downcast().ok().map(|b| *b))
    }

    /// Adds a value and returns self.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Gets a value by type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Removes a value by type.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.data
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok().map(|b| *b))
    }

    /// Returns true if a value of type `T` is present.
    pub fn contains<T: 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for RequestData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestData")
            .field("data_count", &self.data.len())
            .finish()
    }
}

/// State shared by every field of one request.
#[derive(Debug)]
pub(crate) struct RequestScope {
    pub(crate) variables: Variables,
    pub(crate) data: RequestData,
    pub(crate) loaders: LoaderScope,
    pub(crate) cancellation: CancellationToken,
}

impl RequestScope {
    fn standalone() -> Self {
        let scheduler: Arc<dyn BatchScheduler> = Arc::new(NoopBatchScheduler);
        Self {
            variables: Variables::new(),
            data: RequestData::new(),
            loaders: LoaderScope::new(
                Arc::new(LoaderRegistry::new()),
                scheduler,
                ContextToken::next(),
            ),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The key the value is reported under (alias or name).
    pub response_key: String,

    /// The parent type name.
    pub parent_type: String,

    /// The declared return type, e.g. `[Book!]!`.
    pub return_type: String,
}

impl ResolverInfo {
    /// Creates new resolver info.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            response_key: field_name.clone(),
            field_name,
            parent_type: parent_type.into(),
            return_type: String::new(),
        }
    }

    /// Sets the return type.
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    /// Sets the response key.
    pub fn with_response_key(mut self, key: impl Into<String>) -> Self {
        self.response_key = key.into();
        self
    }
}

/// Everything a resolver or middleware sees about one field invocation.
///
/// Cloning is cheap; every part is reference counted.
#[derive(Clone)]
pub struct FieldContext {
    parent: Arc<Value>,
    args: Arc<ResolverArgs>,
    path: Path,
    info: Arc<ResolverInfo>,
    request: Arc<RequestScope>,
}

impl FieldContext {
    /// Creates a context outside of any request, e.g. to test a resolver.
    ///
    /// Data loaders are unavailable and nothing is batched.
    pub fn new(info: ResolverInfo, parent: Value) -> Self {
        let path = Path::root().append_field(info.response_key.as_str());
        Self {
            parent: Arc::new(parent),
            args: Arc::new(ResolverArgs::new()),
            path,
            info: Arc::new(info),
            request: Arc::new(RequestScope::standalone()),
        }
    }

    pub(crate) fn for_field(
        request: Arc<RequestScope>,
        info: ResolverInfo,
        parent: Arc<Value>,
        args: ResolverArgs,
        path: Path,
    ) -> Self {
        Self {
            parent,
            args: Arc::new(args),
            path,
            info: Arc::new(info),
            request,
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args(mut self, args: ResolverArgs) -> Self {
        self.args = Arc::new(args);
        self
    }

    /// Sets the path.
    #[must_use]
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    /// The parent value.
    pub fn parent(&self) -> &Value {
        &self.parent
    }

    /// The coerced arguments.
    pub fn args(&self) -> &ResolverArgs {
        &self.args
    }

    /// The field's path in the result tree.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Info about the field.
    pub fn info(&self) -> &ResolverInfo {
        &self.info
    }

    /// The field name.
    pub fn field_name(&self) -> &str {
        &self.info.field_name
    }

    /// All request variables.
    pub fn variables(&self) -> &Variables {
        &self.request.variables
    }

    /// Gets a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.request.variables.get(name)
    }

    /// Gets request data by type.
    pub fn data<T: 'static>(&self) -> Option<&T> {
        self.request.data.get()
    }

    /// The request's instance of data loader `L`.
    pub fn loader<L: BatchLoader>(&self) -> Result<Arc<DataLoader<L>>, LoadError> {
        self.request.loaders.get::<L>()
    }

    /// The request's cancellation signal.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.request.cancellation
    }

    /// Returns true once the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.request.cancellation.is_cancelled()
    }
}

impl fmt::Debug for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldContext")
            .field("field", &self.info.field_name)
            .field("parent_type", &self.info.parent_type)
            .field("path", &self.path)
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Viewer(&'static str);

    #[test]
    fn test_request_data() {
        let mut data = RequestData::new();
        assert!(data.insert(Viewer("alice")).is_none());
        assert_eq!(data.insert(Viewer("bob")), Some(Viewer("alice")));
        assert!(data.contains::<Viewer>());
        assert_eq!(data.get::<Viewer>(), Some(&Viewer("bob")));
        assert_eq!(data.get::<String>(), None);
        assert_eq!(data.remove::<Viewer>(), Some(Viewer("bob")));
        assert!(data.is_empty());
    }

    #[test]
    fn test_standalone_field_context() {
        let info = ResolverInfo::new("name", "User").with_response_key("userName");
        let ctx = FieldContext::new(info, serde_json::json!({"name": "Alice"}));

        assert_eq!(ctx.path().print(), "/userName");
        assert_eq!(ctx.field_name(), "name");
        assert_eq!(ctx.parent()["name"], "Alice");
        assert!(ctx.variables().is_empty());
        assert!(!ctx.is_cancelled());
        assert!(ctx.data::<Viewer>().is_none());
    }
}
