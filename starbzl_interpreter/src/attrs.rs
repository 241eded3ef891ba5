//! The `attr` namespace: typed attribute schemas for rules and aspects.

use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::coerce::Coerce;
use starlark::environment::GlobalsBuilder;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_complex_value;
use starlark::starlark_module;
use starlark::values::none::NoneOr;
use starlark::values::starlark_value;
use starlark::values::Freeze;
use starlark::values::FreezeResult;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;
use starlark::values::ValueLike;

use crate::coerced::CoercedValue;
use crate::util::iterable_elements;
use crate::util::string_elements;

/// The attribute type, which drives value validation and defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Allocative)]
pub enum AttrKind {
    String,
    Int,
    Bool,
    Label,
    LabelList,
    StringList,
    IntList,
    StringDict,
    StringListDict,
    LabelKeyedStringDict,
    Output,
    OutputList,
}

impl AttrKind {
    pub fn name(self) -> &'static str {
        match self {
            AttrKind::String => "string",
            AttrKind::Int => "int",
            AttrKind::Bool => "bool",
            AttrKind::Label => "label",
            AttrKind::LabelList => "label_list",
            AttrKind::StringList => "string_list",
            AttrKind::IntList => "int_list",
            AttrKind::StringDict => "string_dict",
            AttrKind::StringListDict => "string_list_dict",
            AttrKind::LabelKeyedStringDict => "label_keyed_string_dict",
            AttrKind::Output => "output",
            AttrKind::OutputList => "output_list",
        }
    }

    /// The default for attributes declared without an explicit one.
    pub fn implicit_default(self) -> CoercedValue {
        match self {
            AttrKind::String => CoercedValue::String(String::new()),
            AttrKind::Int => CoercedValue::Int(0),
            AttrKind::Bool => CoercedValue::Bool(false),
            AttrKind::Label | AttrKind::Output => CoercedValue::None,
            AttrKind::LabelList
            | AttrKind::StringList
            | AttrKind::IntList
            | AttrKind::OutputList => CoercedValue::List(Vec::new()),
            AttrKind::StringDict
            | AttrKind::StringListDict
            | AttrKind::LabelKeyedStringDict => CoercedValue::Dict(Vec::new()),
        }
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `allow_files` / `allow_single_file` setting of a label attribute.
#[derive(Debug, Clone, PartialEq, Eq, Allocative)]
pub enum AllowFiles {
    Any,
    Forbidden,
    Extensions(Vec<String>),
}

impl AllowFiles {
    fn parse(what: &str, value: Value<'_>) -> anyhow::Result<AllowFiles> {
        if let Some(b) = value.unpack_bool() {
            return Ok(if b {
                AllowFiles::Any
            } else {
                AllowFiles::Forbidden
            });
        }
        Ok(AllowFiles::Extensions(string_elements(what, value)?))
    }
}

/// An attribute schema produced by one of the `attr.*` constructors.
#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct AttrDescriptorGen<V> {
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    kind: AttrKind,
    default: Option<V>,
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    doc: Option<String>,
    mandatory: bool,
    allow_empty: bool,
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    allow_files: Option<AllowFiles>,
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    allow_single_file: Option<AllowFiles>,
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    allowed_rules: Vec<String>,
    providers: Vec<V>,
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    cfg: Option<String>,
    executable: bool,
    aspects: Vec<V>,
    allowed_values: Vec<V>,
}

unsafe impl<From: Coerce<To>, To> Coerce<AttrDescriptorGen<To>> for AttrDescriptorGen<From> {}

starlark_complex_value!(pub AttrDescriptor);

impl<V> AttrDescriptorGen<V> {
    pub fn kind(&self) -> AttrKind {
        self.kind
    }

    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn allow_empty(&self) -> bool {
        self.allow_empty
    }

    pub fn executable(&self) -> bool {
        self.executable
    }

    pub fn cfg(&self) -> Option<&str> {
        self.cfg.as_deref()
    }
}

impl<'v, V: ValueLike<'v>> AttrDescriptorGen<V> {
    pub fn default_value(&self) -> Option<Value<'v>> {
        self.default.as_ref().map(|v| v.to_value())
    }

    pub fn allowed_values(&self) -> Vec<Value<'v>> {
        self.allowed_values.iter().map(|v| v.to_value()).collect()
    }
}

impl<V> fmt::Display for AttrDescriptorGen<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<attr.{}>", self.kind)
    }
}

#[starlark_value(type = "Attribute")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for AttrDescriptorGen<V>
where
    Self: ProvidesStaticType<'v>,
{
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(attr_descriptor_methods)
    }
}

#[starlark_module]
fn attr_descriptor_methods(builder: &mut MethodsBuilder) {
    #[starlark(attribute)]
    fn default<'v>(this: Value<'v>, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let descriptor = AttrDescriptor::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("not an attribute descriptor"))?;
        Ok(match descriptor.default_value() {
            Some(v) => v,
            None => descriptor.kind.implicit_default().to_value(heap),
        })
    }

    #[starlark(attribute)]
    fn mandatory<'v>(this: Value<'v>) -> anyhow::Result<bool> {
        let descriptor = AttrDescriptor::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("not an attribute descriptor"))?;
        Ok(descriptor.mandatory)
    }

    #[starlark(attribute)]
    fn doc<'v>(this: Value<'v>, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let descriptor = AttrDescriptor::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("not an attribute descriptor"))?;
        Ok(match &descriptor.doc {
            Some(doc) => heap.alloc(doc.as_str()),
            None => Value::new_none(),
        })
    }
}

/// Construction parameters shared by the `attr.*` functions.
struct DescriptorBuilder<'v> {
    kind: AttrKind,
    default: Option<Value<'v>>,
    doc: Option<String>,
    mandatory: bool,
    allow_empty: bool,
    allow_files: Option<AllowFiles>,
    allow_single_file: Option<AllowFiles>,
    allowed_rules: Vec<String>,
    providers: Vec<Value<'v>>,
    cfg: Option<String>,
    executable: bool,
    aspects: Vec<Value<'v>>,
    allowed_values: Vec<Value<'v>>,
}

impl<'v> DescriptorBuilder<'v> {
    fn new(kind: AttrKind) -> Self {
        Self {
            kind,
            default: None,
            doc: None,
            mandatory: false,
            allow_empty: true,
            allow_files: None,
            allow_single_file: None,
            allowed_rules: Vec::new(),
            providers: Vec::new(),
            cfg: None,
            executable: false,
            aspects: Vec::new(),
            allowed_values: Vec::new(),
        }
    }

    fn common(
        mut self,
        default: NoneOr<Value<'v>>,
        doc: NoneOr<&str>,
        mandatory: bool,
    ) -> Self {
        self.default = default.into_option();
        self.doc = doc.into_option().map(str::to_owned);
        self.mandatory = mandatory;
        self
    }

    fn label_options(
        mut self,
        name: &str,
        allow_files: NoneOr<Value<'v>>,
        allow_single_file: NoneOr<Value<'v>>,
        executable: bool,
        providers: NoneOr<Value<'v>>,
        allow_rules: NoneOr<Value<'v>>,
        cfg: NoneOr<&str>,
        aspects: NoneOr<Value<'v>>,
    ) -> anyhow::Result<Self> {
        if !matches!(allow_files, NoneOr::None) && !matches!(allow_single_file, NoneOr::None) {
            anyhow::bail!(
                "attr.{}: Cannot specify both allow_files and allow_single_file",
                name
            );
        }
        if let Some(v) = allow_files.into_option() {
            self.allow_files = Some(AllowFiles::parse("allow_files", v)?);
        }
        if let Some(v) = allow_single_file.into_option() {
            self.allow_single_file = Some(AllowFiles::parse("allow_single_file", v)?);
        }
        if let Some(cfg) = cfg.into_option() {
            if cfg != "target" && cfg != "exec" {
                anyhow::bail!(
                    "attr.{}: cfg must be 'target', 'exec', or a transition, got \"{}\"",
                    name,
                    cfg
                );
            }
            self.cfg = Some(cfg.to_owned());
        }
        if executable && self.cfg.is_none() {
            anyhow::bail!(
                "attr.{}: cfg parameter is mandatory when executable=True is provided",
                name
            );
        }
        self.executable = executable;
        if let Some(v) = providers.into_option() {
            self.providers = iterable_elements("providers", v)?;
        }
        if let Some(v) = allow_rules.into_option() {
            self.allowed_rules = string_elements("allow_rules", v)?;
        }
        if let Some(v) = aspects.into_option() {
            self.aspects = iterable_elements("aspects", v)?;
        }
        Ok(self)
    }

    fn values(mut self, values: NoneOr<Value<'v>>) -> anyhow::Result<Self> {
        if let Some(v) = values.into_option() {
            self.allowed_values = iterable_elements("values", v)?;
        }
        Ok(self)
    }

    fn build(self) -> AttrDescriptor<'v> {
        AttrDescriptorGen {
            kind: self.kind,
            default: self.default,
            doc: self.doc,
            mandatory: self.mandatory,
            allow_empty: self.allow_empty,
            allow_files: self.allow_files,
            allow_single_file: self.allow_single_file,
            allowed_rules: self.allowed_rules,
            providers: self.providers,
            cfg: self.cfg,
            executable: self.executable,
            aspects: self.aspects,
            allowed_values: self.allowed_values,
        }
    }
}

/// Builds a descriptor for an implicit attribute (`name`, `tags`, ...).
pub(crate) fn implicit_attr<'v>(kind: AttrKind, mandatory: bool) -> AttrDescriptor<'v> {
    let mut builder = DescriptorBuilder::new(kind);
    builder.mandatory = mandatory;
    builder.build()
}

impl<'v> AttrDescriptor<'v> {
    pub(crate) fn with_default(mut self, default: Value<'v>) -> Self {
        self.default = Some(default);
        self
    }
}

#[starlark_module]
pub(crate) fn register_attrs(globals: &mut GlobalsBuilder) {
    fn string<'v>(
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] mandatory: bool,
        #[starlark(require = named, default = NoneOr::None)] values: NoneOr<Value<'v>>,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        Ok(DescriptorBuilder::new(AttrKind::String)
            .common(default, doc, mandatory)
            .values(values)?
            .build())
    }

    fn int<'v>(
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] mandatory: bool,
        #[starlark(require = named, default = NoneOr::None)] values: NoneOr<Value<'v>>,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        Ok(DescriptorBuilder::new(AttrKind::Int)
            .common(default, doc, mandatory)
            .values(values)?
            .build())
    }

    fn r#bool<'v>(
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] mandatory: bool,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        Ok(DescriptorBuilder::new(AttrKind::Bool)
            .common(default, doc, mandatory)
            .build())
    }

    fn label<'v>(
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] executable: bool,
        #[starlark(require = named, default = NoneOr::None)] allow_files: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] allow_single_file: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] mandatory: bool,
        #[starlark(require = named, default = NoneOr::None)] providers: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] allow_rules: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] cfg: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] aspects: NoneOr<Value<'v>>,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        Ok(DescriptorBuilder::new(AttrKind::Label)
            .common(default, doc, mandatory)
            .label_options(
                "label",
                allow_files,
                allow_single_file,
                executable,
                providers,
                allow_rules,
                cfg,
                aspects,
            )?
            .build())
    }

    fn label_list<'v>(
        #[starlark(require = named, default = true)] allow_empty: bool,
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] allow_files: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] allow_rules: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] providers: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] mandatory: bool,
        #[starlark(require = named, default = NoneOr::None)] cfg: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] aspects: NoneOr<Value<'v>>,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        let mut builder = DescriptorBuilder::new(AttrKind::LabelList)
            .common(default, doc, mandatory)
            .label_options(
                "label_list",
                allow_files,
                NoneOr::None,
                false,
                providers,
                allow_rules,
                cfg,
                aspects,
            )?;
        builder.allow_empty = allow_empty;
        Ok(builder.build())
    }

    fn string_list<'v>(
        #[starlark(require = named, default = false)] mandatory: bool,
        #[starlark(require = named, default = true)] allow_empty: bool,
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        let mut builder =
            DescriptorBuilder::new(AttrKind::StringList).common(default, doc, mandatory);
        builder.allow_empty = allow_empty;
        Ok(builder.build())
    }

    fn int_list<'v>(
        #[starlark(require = named, default = false)] mandatory: bool,
        #[starlark(require = named, default = true)] allow_empty: bool,
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        let mut builder =
            DescriptorBuilder::new(AttrKind::IntList).common(default, doc, mandatory);
        builder.allow_empty = allow_empty;
        Ok(builder.build())
    }

    fn string_dict<'v>(
        #[starlark(require = named, default = true)] allow_empty: bool,
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] mandatory: bool,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        let mut builder =
            DescriptorBuilder::new(AttrKind::StringDict).common(default, doc, mandatory);
        builder.allow_empty = allow_empty;
        Ok(builder.build())
    }

    fn string_list_dict<'v>(
        #[starlark(require = named, default = true)] allow_empty: bool,
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] mandatory: bool,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        let mut builder =
            DescriptorBuilder::new(AttrKind::StringListDict).common(default, doc, mandatory);
        builder.allow_empty = allow_empty;
        Ok(builder.build())
    }

    fn label_keyed_string_dict<'v>(
        #[starlark(require = named, default = true)] allow_empty: bool,
        #[starlark(require = named, default = NoneOr::None)] default: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] allow_files: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] allow_rules: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] providers: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] mandatory: bool,
        #[starlark(require = named, default = NoneOr::None)] cfg: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] aspects: NoneOr<Value<'v>>,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        let mut builder = DescriptorBuilder::new(AttrKind::LabelKeyedStringDict)
            .common(default, doc, mandatory)
            .label_options(
                "label_keyed_string_dict",
                allow_files,
                NoneOr::None,
                false,
                providers,
                allow_rules,
                cfg,
                aspects,
            )?;
        builder.allow_empty = allow_empty;
        Ok(builder.build())
    }

    fn output<'v>(
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] mandatory: bool,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        Ok(DescriptorBuilder::new(AttrKind::Output)
            .common(NoneOr::None, doc, mandatory)
            .build())
    }

    fn output_list<'v>(
        #[starlark(require = named, default = true)] allow_empty: bool,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] mandatory: bool,
    ) -> anyhow::Result<AttrDescriptor<'v>> {
        let mut builder =
            DescriptorBuilder::new(AttrKind::OutputList).common(NoneOr::None, doc, mandatory);
        builder.allow_empty = allow_empty;
        Ok(builder.build())
    }
}
