//! `provider()`: schema callables and their instances.
//!
//! A provider is created unnamed and receives its name when assigned to a
//! top-level variable (the export hook). Calling it validates keyword
//! arguments against the declared field list and yields a frozen instance.
//! With an `init` preprocessor the constructor expression evaluates to a
//! pair `(provider, raw_constructor)`; the provider's own call path routes
//! arguments through `init`, the raw constructor bypasses it.

use std::cell::RefCell;
use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::coerce::Coerce;
use starlark::collections::SmallMap;
use starlark::environment::GlobalsBuilder;
use starlark::eval::Arguments;
use starlark::eval::Evaluator;
use starlark::starlark_complex_value;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::dict::DictRef;
use starlark::values::none::NoneOr;
use starlark::values::starlark_value;
use starlark::values::AllocValue;
use starlark::values::Freeze;
use starlark::values::FreezeResult;
use starlark::values::Freezer;
use starlark::values::FrozenValue;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;
use starlark::values::ValueLike;

use crate::util::iterable_elements;
use crate::util::to_starlark_error;

/// The result of `provider()` before freezing.
#[derive(Debug, ProvidesStaticType, NoSerialize, Trace, Allocative)]
pub struct ProviderCallable<'v> {
    /// Set by the export hook on top-level assignment; first export wins.
    #[trace(unsafe_ignore)]
    #[allocative(skip)]
    name: RefCell<Option<String>>,
    fields: Option<Vec<String>>,
    doc: Option<String>,
    init: Option<Value<'v>>,
}

impl<'v> ProviderCallable<'v> {
    pub fn new(doc: Option<String>, fields: Option<Vec<String>>, init: Option<Value<'v>>) -> Self {
        Self {
            name: RefCell::new(None),
            fields,
            doc,
            init,
        }
    }

    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }
}

impl<'v> fmt::Display for ProviderCallable<'v> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.name.borrow() {
            Some(name) => write!(f, "<provider {}>", name),
            None => write!(f, "<provider>"),
        }
    }
}

impl<'v> AllocValue<'v> for ProviderCallable<'v> {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex(self)
    }
}

impl<'v> Freeze for ProviderCallable<'v> {
    type Frozen = FrozenProviderCallable;
    fn freeze(self, freezer: &Freezer) -> anyhow::Result<Self::Frozen> {
        Ok(FrozenProviderCallable {
            name: self.name.into_inner(),
            fields: self.fields,
            doc: self.doc,
            init: self.init.freeze(freezer)?,
        })
    }
}

#[starlark_value(type = "provider")]
impl<'v> StarlarkValue<'v> for ProviderCallable<'v> {
    fn export_as(
        &self,
        variable_name: &str,
        _eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<()> {
        let mut name = self.name.borrow_mut();
        if name.is_none() {
            *name = Some(variable_name.to_owned());
        }
        Ok(())
    }

    fn invoke(
        &self,
        _me: Value<'v>,
        args: &Arguments<'v, '_>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<Value<'v>> {
        call_provider(
            self.name(),
            self.fields.as_deref(),
            self.init,
            args,
            eval,
        )
    }
}

/// A provider whose defining module has been frozen.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct FrozenProviderCallable {
    name: Option<String>,
    fields: Option<Vec<String>>,
    doc: Option<String>,
    init: Option<FrozenValue>,
}

starlark_simple_value!(FrozenProviderCallable);

impl FrozenProviderCallable {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

impl fmt::Display for FrozenProviderCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<provider {}>", name),
            None => write!(f, "<provider>"),
        }
    }
}

#[starlark_value(type = "provider")]
impl<'v> StarlarkValue<'v> for FrozenProviderCallable {
    type Canonical = ProviderCallable<'v>;

    fn invoke(
        &self,
        _me: Value<'v>,
        args: &Arguments<'v, '_>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<Value<'v>> {
        call_provider(
            self.name.clone(),
            self.fields.as_deref(),
            self.init.map(|v| v.to_value()),
            args,
            eval,
        )
    }
}

/// Splits a provider value (frozen or not) into name, fields and init.
pub(crate) fn provider_parts<'v>(
    value: Value<'v>,
) -> Option<(Option<String>, Option<Vec<String>>, Option<Value<'v>>)> {
    if let Some(p) = value.downcast_ref::<ProviderCallable>() {
        return Some((p.name(), p.fields.clone(), p.init));
    }
    if let Some(p) = value.downcast_ref::<FrozenProviderCallable>() {
        return Some((
            p.name.clone(),
            p.fields.clone(),
            p.init.map(|v| v.to_value()),
        ));
    }
    None
}

fn call_provider<'v>(
    name: Option<String>,
    fields: Option<&[String]>,
    init: Option<Value<'v>>,
    args: &Arguments<'v, '_>,
    eval: &mut Evaluator<'v, '_, '_>,
) -> starlark::Result<Value<'v>> {
    let name = name.ok_or_else(|| {
        to_starlark_error(anyhow::anyhow!(
            "provider has not been exported (assign it to a global variable in the .bzl where it's defined)"
        ))
    })?;

    if let Some(init) = init {
        let positions: Vec<Value<'v>> = args.positions(eval.heap())?.collect();
        let named = args.names_map()?;
        let named: Vec<(&str, Value<'v>)> = named
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        let result = eval.eval_function(init, &positions, &named)?;
        let dict = DictRef::from_value(result).ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!(
                "{}: init must return a dict, got {}",
                name,
                result.get_type()
            ))
        })?;
        let mut values = SmallMap::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let key = key.unpack_str().ok_or_else(|| {
                to_starlark_error(anyhow::anyhow!(
                    "{}: init returned dict with non-string key: {}",
                    name,
                    key.get_type()
                ))
            })?;
            check_field(&name, fields, key).map_err(to_starlark_error)?;
            values.insert(key.to_owned(), value);
        }
        return Ok(eval.heap().alloc(ProviderInstance::new(name, values)));
    }

    raw_construct(name, fields, args, eval)
}

/// The kwargs-only construction path, shared with the raw constructor.
fn raw_construct<'v>(
    name: String,
    fields: Option<&[String]>,
    args: &Arguments<'v, '_>,
    eval: &mut Evaluator<'v, '_, '_>,
) -> starlark::Result<Value<'v>> {
    args.no_positional_args(eval.heap())?;
    let named = args.names_map()?;
    let mut values = SmallMap::with_capacity(named.len());
    for (key, value) in named.iter() {
        check_field(&name, fields, key.as_str()).map_err(to_starlark_error)?;
        values.insert(key.as_str().to_owned(), *value);
    }
    Ok(eval.heap().alloc(ProviderInstance::new(name, values)))
}

fn check_field(provider: &str, fields: Option<&[String]>, key: &str) -> anyhow::Result<()> {
    if let Some(fields) = fields {
        if !fields.iter().any(|f| f == key) {
            anyhow::bail!("{}: unexpected field '{}'", provider, key);
        }
    }
    Ok(())
}

/// An instance of a provider: a value record over the declared fields.
#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct ProviderInstanceGen<V> {
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    provider_name: String,
    values: SmallMap<String, V>,
}

unsafe impl<From: Coerce<To>, To> Coerce<ProviderInstanceGen<To>> for ProviderInstanceGen<From> {}

starlark_complex_value!(pub ProviderInstance);

impl<'v> ProviderInstance<'v> {
    pub fn new(provider_name: String, values: SmallMap<String, Value<'v>>) -> Self {
        ProviderInstanceGen {
            provider_name,
            values,
        }
    }
}

impl<V> ProviderInstanceGen<V> {
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn field(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }
}

fn fmt_instance<'v, V: ValueLike<'v>>(
    instance: &ProviderInstanceGen<V>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    write!(f, "{}(", instance.provider_name)?;
    let mut keys: Vec<&String> = instance.values.keys().collect();
    keys.sort();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        let value = instance.values.get(*key).unwrap().to_value();
        write!(f, "{} = {}", key, value.to_repr())?;
    }
    f.write_str(")")
}

impl<'v> fmt::Display for ProviderInstanceGen<Value<'v>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_instance(self, f)
    }
}

impl fmt::Display for ProviderInstanceGen<FrozenValue> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_instance(self, f)
    }
}

#[starlark_value(type = "provider")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for ProviderInstanceGen<V>
where
    Self: ProvidesStaticType<'v> + fmt::Display,
{
    fn get_attr(&self, attribute: &str, _heap: &'v Heap) -> Option<Value<'v>> {
        self.values.get(attribute).map(|v| v.to_value())
    }

    fn dir_attr(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }
}

#[starlark_module]
pub(crate) fn register_provider(globals: &mut GlobalsBuilder) {
    /// Declares a provider schema. With `init`, evaluates to the pair
    /// `(provider, raw_constructor)`.
    fn provider<'v>(
        #[starlark(default = "")] doc: &str,
        #[starlark(require = named, default = NoneOr::None)] fields: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] init: NoneOr<Value<'v>>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let fields = match fields.into_option() {
            None => None,
            Some(v) => Some(parse_fields(v)?),
        };
        let doc = if doc.is_empty() {
            None
        } else {
            Some(doc.to_owned())
        };
        match init.into_option() {
            None => Ok(heap.alloc(ProviderCallable::new(doc, fields, None))),
            Some(init) => {
                let callable = heap.alloc(ProviderCallable::new(doc, fields, Some(init)));
                let raw = heap.alloc(RawConstructor { provider: callable });
                Ok(heap.alloc((callable, raw)))
            }
        }
    }
}

fn parse_fields(value: Value<'_>) -> anyhow::Result<Vec<String>> {
    if let Some(dict) = DictRef::from_value(value) {
        let mut fields = Vec::with_capacity(dict.len());
        for (key, _doc) in dict.iter() {
            match key.unpack_str() {
                Some(s) => fields.push(s.to_owned()),
                None => anyhow::bail!("provider: fields must be strings, got {}", key.get_type()),
            }
        }
        return Ok(fields);
    }
    iterable_elements("fields", value)?
        .into_iter()
        .map(|v| match v.unpack_str() {
            Some(s) => Ok(s.to_owned()),
            None => anyhow::bail!("provider: fields must be strings, got {}", v.get_type()),
        })
        .collect()
}

/// The `init`-bypassing constructor returned alongside a provider.
#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct RawConstructorGen<V> {
    provider: V,
}

unsafe impl<From: Coerce<To>, To> Coerce<RawConstructorGen<To>> for RawConstructorGen<From> {}

starlark_complex_value!(pub RawConstructor);

impl<V: fmt::Debug> fmt::Display for RawConstructorGen<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<raw constructor for {:?}>", self.provider)
    }
}

#[starlark_value(type = "raw_constructor")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for RawConstructorGen<V>
where
    Self: ProvidesStaticType<'v>,
{
    fn invoke(
        &self,
        _me: Value<'v>,
        args: &Arguments<'v, '_>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<Value<'v>> {
        let (name, fields, _init) = provider_parts(self.provider.to_value()).ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!("raw constructor is not bound to a provider"))
        })?;
        let name = name.ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!(
                "provider has not been exported (assign it to a global variable in the .bzl where it's defined)"
            ))
        })?;
        raw_construct(name, fields.as_deref(), args, eval)
    }
}
