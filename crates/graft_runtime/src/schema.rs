//! Schema definition for graft.
//!
//! Types are declared with [`TypeDef`] values on a [`SchemaBuilder`] and
//! linked in two phases when the schema is built: every type first receives
//! a stable [`TypeId`], then field type references are resolved against
//! those ids. Field pipelines are compiled once during linking and shared
//! read-only by every request.

use crate::context::FieldContext;
use crate::middleware::{FieldDelegate, FieldMiddleware, SharedMiddleware};
use crate::operation::OperationKind;
use crate::resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, Resolver, ResolverMap, ResolverResult,
    SharedResolver,
};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Two types share a name.
    #[error("type '{0}' is declared more than once")]
    DuplicateType(String),

    /// A reference names a type that was never declared.
    #[error("unknown type '{type_name}' referenced by {referenced_by}")]
    UnknownType {
        type_name: String,
        referenced_by: String,
    },

    /// No query root was configured.
    #[error("the schema has no query type")]
    MissingQueryType,

    /// A root operation type is not an object type.
    #[error("root type '{0}' must be an object type")]
    InvalidRootType(String),

    /// An object implements something that is not an interface.
    #[error("'{object}' cannot implement '{interface}', which is not an interface")]
    NotAnInterface { object: String, interface: String },

    /// A union member is not an object type.
    #[error("union '{union}' member '{member}' must be an object type")]
    InvalidUnionMember { union: String, member: String },

    /// A type reference string could not be parsed.
    #[error("invalid type reference '{0}'")]
    InvalidTypeRef(String),
}

/// A stable index into a built schema's type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    /// The position of the type in declaration order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Type reference.
///
/// Declarations reference types by name; a built schema references them by
/// [`TypeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef<T = String> {
    Named(T),
    List(Box<TypeRef<T>>),
    NonNull(Box<TypeRef<T>>),
}

impl<T> TypeRef<T> {
    pub fn named(name: impl Into<T>) -> Self {
        Self::Named(name.into())
    }

    pub fn list(inner: TypeRef<T>) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef<T>) -> Self {
        Self::NonNull(Box::new(inner))
    }

    /// Returns true if the outermost wrapper is non-null.
    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Returns true if the type is a list, ignoring a non-null wrapper.
    pub fn is_list(&self) -> bool {
        match self {
            Self::List(_) => true,
            Self::NonNull(inner) => inner.is_list(),
            Self::Named(_) => false,
        }
    }

    /// The type without its non-null wrapper.
    pub fn nullable(&self) -> &TypeRef<T> {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }

    /// The innermost named type.
    pub fn named_type(&self) -> &T {
        match self {
            Self::Named(name) => name,
            Self::List(inner) | Self::NonNull(inner) => inner.named_type(),
        }
    }

    /// Maps the named type, keeping the wrappers.
    pub fn try_map<U, E>(&self, f: &mut impl FnMut(&T) -> Result<U, E>) -> Result<TypeRef<U>, E> {
        Ok(match self {
            Self::Named(name) => TypeRef::Named(f(name)?),
            Self::List(inner) => TypeRef::List(Box::new(inner.try_map(f)?)),
            Self::NonNull(inner) => TypeRef::NonNull(Box::new(inner.try_map(f)?)),
        })
    }
}

impl TypeRef<String> {
    /// Parses SDL type notation such as `[Book!]!`.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let invalid = || SchemaError::InvalidTypeRef(input.to_string());
        let s = input.trim();

        if let Some(inner) = s.strip_suffix('!') {
            let inner = Self::parse(inner).map_err(|_| invalid())?;
            if inner.is_non_null() {
                return Err(invalid());
            }
            return Ok(Self::non_null(inner));
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return Self::parse(inner).map(Self::list).map_err(|_| invalid());
        }

        let mut chars = s.chars();
        let valid = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
            && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
        if valid {
            Ok(Self::Named(s.to_string()))
        } else {
            Err(invalid())
        }
    }
}

impl<T: fmt::Display> fmt::Display for TypeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::List(inner) => write!(f, "[{inner}]"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Built-in scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    String,
    Boolean,
    Id,
    /// Values are passed through unchanged.
    Custom,
}

/// Scalar type definition.
#[derive(Debug, Clone)]
pub struct ScalarDef {
    pub name: String,
    pub description: Option<String>,
    pub kind: ScalarKind,
}

impl ScalarDef {
    /// Creates a custom scalar.
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind: ScalarKind::Custom,
        }
    }

    fn builtin(name: &str, kind: ScalarKind) -> Self {
        Self {
            name: name.to_string(),
            description: Some(format!("Built-in {name} scalar")),
            kind,
        }
    }

    /// Coerces a resolved value for output.
    pub fn serialize(&self, value: Value) -> Result<Value, String> {
        let coerced = match (self.kind, &value) {
            (ScalarKind::Custom, _) => Some(value.clone()),
            (ScalarKind::Int, Value::Number(n)) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .filter(|i| i32::try_from(*i).is_ok())
                .map(Value::from),
            (ScalarKind::Float, Value::Number(n)) => n.as_f64().map(Value::from),
            (ScalarKind::String, Value::String(_)) | (ScalarKind::Boolean, Value::Bool(_)) => {
                Some(value.clone())
            }
            (ScalarKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ScalarKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ScalarKind::Id, Value::String(_)) => Some(value.clone()),
            (ScalarKind::Id, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(Value::String(n.to_string()))
            }
            _ => None,
        };
        coerced.ok_or_else(|| format!("{} cannot represent value: {value}", self.name))
    }
}

/// Picks the concrete object type name for an abstract value.
pub type TypeResolver = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Object type definition.
#[derive(Debug, Clone)]
pub struct ObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
}

impl ObjectDef {
    /// Creates an object type without fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
            implements: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Declares an implemented interface.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Interface type definition.
///
/// Possible types are the objects that declare the interface.
#[derive(Clone)]
pub struct InterfaceDef {
    pub name: String,
    pub description: Option<String>,
    pub resolve_type: Option<TypeResolver>,
}

impl InterfaceDef {
    /// Creates an interface resolved through `__typename`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            resolve_type: None,
        }
    }

    /// Sets a custom type resolver.
    pub fn resolve_type<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.resolve_type = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for InterfaceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceDef")
            .field("name", &self.name)
            .field("has_resolve_type", &self.resolve_type.is_some())
            .finish()
    }
}

/// Union type definition.
#[derive(Clone)]
pub struct UnionDef {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<String>,
    pub resolve_type: Option<TypeResolver>,
}

impl UnionDef {
    /// Creates a union of the given object types.
    pub fn new(name: impl Into<String>, members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            description: None,
            members: members.into_iter().map(Into::into).collect(),
            resolve_type: None,
        }
    }

    /// Sets a custom type resolver.
    pub fn resolve_type<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.resolve_type = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for UnionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnionDef")
            .field("name", &self.name)
            .field("members", &self.members)
            .field("has_resolve_type", &self.resolve_type.is_some())
            .finish()
    }
}

/// Enum type definition.
#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub description: Option<String>,
    pub values: Vec<String>,
}

impl EnumDef {
    /// Creates an enum with the given values.
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            description: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Coerces a resolved value for output.
    pub fn serialize(&self, value: Value) -> Result<Value, String> {
        match &value {
            Value::String(s) if self.values.iter().any(|v| v == s) => Ok(value),
            _ => Err(format!("Enum '{}' cannot represent value: {value}", self.name)),
        }
    }
}

/// Field definition.
#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub resolver: Option<SharedResolver>,
    pub middleware: Vec<SharedMiddleware>,
    pub skip_middleware: bool,
    /// Values for arguments the operation leaves unset.
    pub argument_defaults: IndexMap<String, Value>,
}

impl FieldDef {
    /// Creates a field of the given type.
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            resolver: None,
            middleware: Vec::new(),
            skip_middleware: false,
            argument_defaults: IndexMap::new(),
        }
    }

    /// Sets the resolver.
    pub fn resolver<R: Resolver + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Sets a sync function as the resolver.
    pub fn resolve_fn<F>(self, f: F) -> Self
    where
        F: Fn(&FieldContext) -> ResolverResult + Send + Sync + 'static,
    {
        self.resolver(FnResolver::new(f))
    }

    /// Sets an async function as the resolver.
    pub fn resolve_async<F, Fut>(self, f: F) -> Self
    where
        F: Fn(FieldContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.resolver(AsyncFnResolver::new(f))
    }

    /// Adds field-specific middleware.
    pub fn middleware<M: FieldMiddleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Bypasses all middleware for this field.
    pub fn skip_middleware(mut self) -> Self {
        self.skip_middleware = true;
        self
    }

    /// Declares a default for an argument.
    pub fn argument_default(mut self, name: impl Into<String>, value: Value) -> Self {
        self.argument_defaults.insert(name.into(), value);
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("ty", &self.ty.to_string())
            .field("has_resolver", &self.resolver.is_some())
            .field("middleware_count", &self.middleware.len())
            .field("skip_middleware", &self.skip_middleware)
            .finish()
    }
}

/// A type definition.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Scalar(ScalarDef),
    Object(ObjectDef),
    Interface(InterfaceDef),
    Union(UnionDef),
    Enum(EnumDef),
}

impl TypeDef {
    /// The type's name.
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Scalar(s) => &s.name,
            TypeDef::Object(o) => &o.name,
            TypeDef::Interface(i) => &i.name,
            TypeDef::Union(u) => &u.name,
            TypeDef::Enum(e) => &e.name,
        }
    }
}

impl From<ObjectDef> for TypeDef {
    fn from(def: ObjectDef) -> Self {
        Self::Object(def)
    }
}

impl From<InterfaceDef> for TypeDef {
    fn from(def: InterfaceDef) -> Self {
        Self::Interface(def)
    }
}

impl From<UnionDef> for TypeDef {
    fn from(def: UnionDef) -> Self {
        Self::Union(def)
    }
}

impl From<EnumDef> for TypeDef {
    fn from(def: EnumDef) -> Self {
        Self::Enum(def)
    }
}

impl From<ScalarDef> for TypeDef {
    fn from(def: ScalarDef) -> Self {
        Self::Scalar(def)
    }
}

/// A linked field of an object type.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    /// The declared type, as written.
    pub declared: TypeRef,
    pub ty: TypeRef<TypeId>,
    pub delegate: FieldDelegate,
    pub argument_defaults: IndexMap<String, Value>,
}

/// A linked object type.
#[derive(Debug, Clone)]
pub struct ObjectType {
    pub name: String,
    pub fields: IndexMap<String, SchemaField>,
    pub interfaces: Vec<TypeId>,
}

/// A linked interface or union.
#[derive(Clone)]
pub struct AbstractType {
    pub name: String,
    pub possible_types: Vec<TypeId>,
    pub resolve_type: Option<TypeResolver>,
}

impl fmt::Debug for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractType")
            .field("name", &self.name)
            .field("possible_types", &self.possible_types)
            .finish()
    }
}

/// A linked type.
#[derive(Debug, Clone)]
pub enum SchemaType {
    Scalar(ScalarDef),
    Object(ObjectType),
    Interface(AbstractType),
    Union(AbstractType),
    Enum(EnumDef),
}

impl SchemaType {
    /// The type's name.
    pub fn name(&self) -> &str {
        match self {
            SchemaType::Scalar(s) => &s.name,
            SchemaType::Object(o) => &o.name,
            SchemaType::Interface(a) | SchemaType::Union(a) => &a.name,
            SchemaType::Enum(e) => &e.name,
        }
    }
}

/// A built, immutable schema.
#[derive(Debug)]
pub struct Schema {
    types: Vec<SchemaType>,
    by_name: FxHashMap<String, TypeId>,
    query_type: TypeId,
    mutation_type: Option<TypeId>,
    subscription_type: Option<TypeId>,
}

impl Schema {
    /// Starts a schema builder.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Gets a type by name.
    pub fn get_type(&self, name: &str) -> Option<&SchemaType> {
        self.type_id(name).map(|id| self.type_by_id(id))
    }

    /// Gets a type id by name.
    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    /// Gets a type by id.
    pub fn type_by_id(&self, id: TypeId) -> &SchemaType {
        &self.types[id.index()]
    }

    /// Gets an object type by id.
    pub fn object(&self, id: TypeId) -> Option<&ObjectType> {
        match self.type_by_id(id) {
            SchemaType::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Returns all types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &SchemaType)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, ty)| (TypeId(i as u32), ty))
    }

    /// The query root.
    pub fn query_type(&self) -> TypeId {
        self.query_type
    }

    /// The mutation root, if any.
    pub fn mutation_type(&self) -> Option<TypeId> {
        self.mutation_type
    }

    /// The subscription root, if any.
    pub fn subscription_type(&self) -> Option<TypeId> {
        self.subscription_type
    }

    /// The root type for an operation kind.
    pub fn root_type(&self, kind: OperationKind) -> Option<TypeId> {
        match kind {
            OperationKind::Query => Some(self.query_type),
            OperationKind::Mutation => self.mutation_type,
            OperationKind::Subscription => self.subscription_type,
        }
    }

    /// Returns true if a fragment on `condition` applies to `object`.
    pub fn type_condition_applies(&self, condition: &str, object: TypeId) -> bool {
        let Some(condition_id) = self.type_id(condition) else {
            return false;
        };
        if condition_id == object {
            return true;
        }
        match self.type_by_id(condition_id) {
            SchemaType::Interface(a) | SchemaType::Union(a) => a.possible_types.contains(&object),
            _ => false,
        }
    }

    /// Resolves the concrete object type of a value of an abstract type.
    pub fn resolve_abstract(&self, abstract_id: TypeId, value: &Value) -> Option<TypeId> {
        let abstract_type = match self.type_by_id(abstract_id) {
            SchemaType::Interface(a) | SchemaType::Union(a) => a,
            SchemaType::Object(_) => return Some(abstract_id),
            _ => return None,
        };
        let name = match &abstract_type.resolve_type {
            Some(resolve) => resolve(value),
            None => value
                .get("__typename")
                .and_then(Value::as_str)
                .map(str::to_string),
        }?;
        self.type_id(&name)
            .filter(|id| abstract_type.possible_types.contains(id))
    }
}

/// Schema builder.
pub struct SchemaBuilder {
    types: Vec<TypeDef>,
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    middleware: Vec<SharedMiddleware>,
    resolvers: Option<ResolverMap>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBuilder")
            .field("types", &self.types)
            .field("query_type", &self.query_type)
            .field("mutation_type", &self.mutation_type)
            .field("middleware_count", &self.middleware.len())
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

impl SchemaBuilder {
    /// Creates a new schema builder with the built-in scalars declared.
    pub fn new() -> Self {
        let types = [
            ("Int", ScalarKind::Int),
            ("Float", ScalarKind::Float),
            ("String", ScalarKind::String),
            ("Boolean", ScalarKind::Boolean),
            ("ID", ScalarKind::Id),
        ]
        .into_iter()
        .map(|(name, kind)| TypeDef::Scalar(ScalarDef::builtin(name, kind)))
        .collect();

        Self {
            types,
            query_type: None,
            mutation_type: None,
            subscription_type: None,
            middleware: Vec::new(),
            resolvers: None,
        }
    }

    /// Sets the query type.
    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.query_type = Some(name.into());
        self
    }

    /// Sets the mutation type.
    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.mutation_type = Some(name.into());
        self
    }

    /// Sets the subscription type.
    pub fn subscription_type(mut self, name: impl Into<String>) -> Self {
        self.subscription_type = Some(name.into());
        self
    }

    /// Adds a type.
    pub fn add_type(mut self, type_def: impl Into<TypeDef>) -> Self {
        self.types.push(type_def.into());
        self
    }

    /// Adds middleware that wraps every field.
    ///
    /// Middleware added first runs outermost.
    pub fn middleware<M: FieldMiddleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Supplies resolvers for fields declared without one.
    pub fn with_resolvers(mut self, resolvers: ResolverMap) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    /// Builds the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        // Declare
        let mut by_name = FxHashMap::default();
        for (i, def) in self.types.iter().enumerate() {
            let id = TypeId(u32::try_from(i).unwrap_or(u32::MAX));
            if by_name.insert(def.name().to_string(), id).is_some() {
                return Err(SchemaError::DuplicateType(def.name().to_string()));
            }
        }

        let lookup = |name: &str, referenced_by: &str| -> Result<TypeId, SchemaError> {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| SchemaError::UnknownType {
                    type_name: name.to_string(),
                    referenced_by: referenced_by.to_string(),
                })
        };
        let is_object = |id: TypeId| matches!(self.types[id.index()], TypeDef::Object(_));

        // Link
        let mut types = Vec::with_capacity(self.types.len());
        for def in &self.types {
            let linked = match def {
                TypeDef::Scalar(scalar) => SchemaType::Scalar(scalar.clone()),
                TypeDef::Enum(def) => SchemaType::Enum(def.clone()),
                TypeDef::Interface(def) => SchemaType::Interface(AbstractType {
                    name: def.name.clone(),
                    possible_types: Vec::new(),
                    resolve_type: def.resolve_type.clone(),
                }),
                TypeDef::Union(def) => {
                    let mut members = Vec::with_capacity(def.members.len());
                    for member in &def.members {
                        let id = lookup(member, &def.name)?;
                        if !is_object(id) {
                            return Err(SchemaError::InvalidUnionMember {
                                union: def.name.clone(),
                                member: member.clone(),
                            });
                        }
                        members.push(id);
                    }
                    SchemaType::Union(AbstractType {
                        name: def.name.clone(),
                        possible_types: members,
                        resolve_type: def.resolve_type.clone(),
                    })
                }
                TypeDef::Object(def) => SchemaType::Object(self.link_object(def, &lookup)?),
            };
            types.push(linked);
        }

        // Interfaces learn their implementations once every object is linked.
        for i in 0..types.len() {
            let interfaces = match &types[i] {
                SchemaType::Object(object) => object.interfaces.clone(),
                _ => continue,
            };
            for interface in interfaces {
                if let SchemaType::Interface(a) = &mut types[interface.index()] {
                    a.possible_types.push(TypeId(u32::try_from(i).unwrap_or(u32::MAX)));
                }
            }
        }

        let root = |name: &Option<String>| -> Result<Option<TypeId>, SchemaError> {
            let Some(name) = name else {
                return Ok(None);
            };
            let id = lookup(name, "the schema root")?;
            if is_object(id) {
                Ok(Some(id))
            } else {
                Err(SchemaError::InvalidRootType(name.clone()))
            }
        };
        let query_type = root(&self.query_type)?.ok_or(SchemaError::MissingQueryType)?;
        let mutation_type = root(&self.mutation_type)?;
        let subscription_type = root(&self.subscription_type)?;

        tracing::debug!(types = types.len(), "schema built");

        Ok(Schema {
            types,
            by_name,
            query_type,
            mutation_type,
            subscription_type,
        })
    }

    fn link_object(
        &self,
        def: &ObjectDef,
        lookup: &impl Fn(&str, &str) -> Result<TypeId, SchemaError>,
    ) -> Result<ObjectType, SchemaError> {
        let mut interfaces = Vec::with_capacity(def.implements.len());
        for interface in &def.implements {
            let id = lookup(interface, &def.name)?;
            if !matches!(self.types[id.index()], TypeDef::Interface(_)) {
                return Err(SchemaError::NotAnInterface {
                    object: def.name.clone(),
                    interface: interface.clone(),
                });
            }
            interfaces.push(id);
        }

        let mut fields = IndexMap::with_capacity(def.fields.len());
        for field in def.fields.values() {
            let referenced_by = format!("{}.{}", def.name, field.name);
            let ty = field.ty.try_map(&mut |name| lookup(name, &referenced_by))?;
            let resolver = field.resolver.clone().or_else(|| match &self.resolvers {
                Some(map) => map.get(&def.name, &field.name),
                None => Some(Arc::new(DefaultResolver) as SharedResolver),
            });
            let delegate = FieldDelegate::compile(
                &self.middleware,
                &field.middleware,
                resolver,
                field.skip_middleware,
            );
            fields.insert(
                field.name.clone(),
                SchemaField {
                    name: field.name.clone(),
                    declared: field.ty.clone(),
                    ty,
                    delegate,
                    argument_defaults: field.argument_defaults.clone(),
                },
            );
        }

        Ok(ObjectType {
            name: def.name.clone(),
            fields,
            interfaces,
        })
    }
}
