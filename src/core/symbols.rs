// This module holds the symbol services shared by both backends. FunctionDescriptor describes a
// library function (symbol, owning library, parameter types, return kind, variadic flag and
// whether it returns a freshly allocated string), Library resolves calls written in source
// programs against the user-callable descriptors, and the runtime module lists the C runtime
// functions the generators call on their own (allocation, copying, comparison, formatting).
// SymbolTable owns the program's data symbols: declared variables with their sanitized
// labels and GC type-pointer words, de-duplicated float and string constants, the float sign
// mask, and the dependency map recording which library symbols the emitted code calls. The
// map is ordered so import sections and declarations render deterministically.

//! Library descriptors, data symbols and the dependency map.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use hashbrown::HashMap;
use log::warn;

use crate::ast::{Program, ValueType, VarDecl};
use crate::core::error::{CompileError, CompileResult};

/// The C runtime every generated program imports from.
pub const MSVCRT: &str = "msvcrt";

/// How a library function returns its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Value(ValueType),
    /// A C `int`; only the low 32 bits of the return register are defined.
    Int32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: &'static str,
    pub library: &'static str,
    pub params: &'static [ValueType],
    pub ret: ReturnKind,
    /// Accepts arguments past `params`.
    pub variadic: bool,
    /// Returns a heap string the caller owns.
    pub allocates: bool,
}

impl FunctionDescriptor {
    const fn msvcrt(name: &'static str, params: &'static [ValueType], ret: ReturnKind) -> Self {
        Self {
            name,
            library: MSVCRT,
            params,
            ret,
            variadic: false,
            allocates: false,
        }
    }

    const fn variadic(self) -> Self {
        Self { variadic: true, ..self }
    }

    const fn allocating(self) -> Self {
        Self { allocates: true, ..self }
    }

    /// Type of the result as seen by expressions.
    pub fn value_type(&self) -> Option<ValueType> {
        match self.ret {
            ReturnKind::Void => None,
            ReturnKind::Value(ty) => Some(ty),
            ReturnKind::Int32 => Some(ValueType::I64),
        }
    }

    pub fn accepts(&self, args: &[ValueType]) -> bool {
        if args.len() < self.params.len() || (!self.variadic && args.len() != self.params.len()) {
            return false;
        }
        self.params.iter().zip(args).all(|(p, a)| p == a)
    }
}

/// Render `name(t1, t2)` for diagnostics.
pub fn signature(name: &str, args: &[ValueType]) -> String {
    let args: Vec<&str> = args.iter().map(|t| t.name()).collect();
    format!("{}({})", name, args.join(", "))
}

/// Functions the generators call without a source level call node.
pub mod runtime {
    use super::{FunctionDescriptor, ReturnKind};
    use crate::ast::ValueType::{F64, I64, Str};

    pub const MALLOC: FunctionDescriptor =
        FunctionDescriptor::msvcrt("malloc", &[I64], ReturnKind::Value(Str));
    pub const FREE: FunctionDescriptor = FunctionDescriptor::msvcrt("free", &[Str], ReturnKind::Void);
    pub const STRLEN: FunctionDescriptor =
        FunctionDescriptor::msvcrt("strlen", &[Str], ReturnKind::Value(I64));
    pub const STRCPY: FunctionDescriptor =
        FunctionDescriptor::msvcrt("strcpy", &[Str, Str], ReturnKind::Value(Str));
    pub const STRCAT: FunctionDescriptor =
        FunctionDescriptor::msvcrt("strcat", &[Str, Str], ReturnKind::Value(Str));
    pub const STRCMP: FunctionDescriptor =
        FunctionDescriptor::msvcrt("strcmp", &[Str, Str], ReturnKind::Int32);
    pub const PRINTF: FunctionDescriptor =
        FunctionDescriptor::msvcrt("printf", &[Str], ReturnKind::Int32).variadic();
    pub const SPRINTF: FunctionDescriptor =
        FunctionDescriptor::msvcrt("sprintf", &[Str, Str], ReturnKind::Int32).variadic();
    pub const EXIT: FunctionDescriptor = FunctionDescriptor::msvcrt("exit", &[I64], ReturnKind::Void);
    pub const ATOI64: FunctionDescriptor =
        FunctionDescriptor::msvcrt("_atoi64", &[Str], ReturnKind::Value(I64));
    pub const ATOF: FunctionDescriptor =
        FunctionDescriptor::msvcrt("atof", &[Str], ReturnKind::Value(F64));

    pub const ALL: &[FunctionDescriptor] = &[
        MALLOC, FREE, STRLEN, STRCPY, STRCAT, STRCMP, PRINTF, SPRINTF, EXIT, ATOI64, ATOF,
    ];
}

/// Functions callable from source programs.
pub struct Library {
    functions: Vec<FunctionDescriptor>,
}

impl Library {
    pub fn new(functions: Vec<FunctionDescriptor>) -> Self {
        Self { functions }
    }

    pub fn standard() -> Self {
        use ValueType::{F64, I64, Str};
        Self::new(vec![
            runtime::STRLEN,
            FunctionDescriptor::msvcrt("_strdup", &[Str], ReturnKind::Value(Str)).allocating(),
            runtime::ATOI64,
            runtime::ATOF,
            FunctionDescriptor::msvcrt("sqrt", &[F64], ReturnKind::Value(F64)),
            FunctionDescriptor::msvcrt("floor", &[F64], ReturnKind::Value(F64)),
            FunctionDescriptor::msvcrt("fabs", &[F64], ReturnKind::Value(F64)),
            FunctionDescriptor::msvcrt("pow", &[F64, F64], ReturnKind::Value(F64)),
            FunctionDescriptor::msvcrt("_abs64", &[I64], ReturnKind::Value(I64)),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Resolve a call by name and argument types.
    pub fn resolve(&self, name: &str, args: &[ValueType]) -> CompileResult<&FunctionDescriptor> {
        self.functions
            .iter()
            .find(|f| f.name == name && f.accepts(args))
            .ok_or_else(|| CompileError::UnknownFunction { signature: signature(name, args) })
    }

    /// Descriptor for any symbol the emitted code may reference.
    pub fn descriptor(&self, name: &str) -> Option<FunctionDescriptor> {
        self.get(name)
            .copied()
            .or_else(|| runtime::ALL.iter().find(|f| f.name == name).copied())
    }

    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::standard()
    }
}

/// Library name to the set of symbols used from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    libraries: BTreeMap<&'static str, BTreeSet<&'static str>>,
}

impl Dependencies {
    pub fn record(&mut self, function: &FunctionDescriptor) {
        self.libraries.entry(function.library).or_default().insert(function.name);
    }

    pub fn contains(&self, library: &str, symbol: &str) -> bool {
        self.libraries.get(library).is_some_and(|s| s.contains(symbol))
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn libraries(&self) -> impl Iterator<Item = (&'static str, &BTreeSet<&'static str>)> + '_ {
        self.libraries.iter().map(|(lib, syms)| (*lib, syms))
    }

    /// All imported symbols, ordered by library then name.
    pub fn symbols(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.libraries.values().flat_map(|s| s.iter().copied())
    }
}

impl fmt::Display for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (library, symbols) in &self.libraries {
            let symbols: Vec<&str> = symbols.iter().copied().collect();
            writeln!(f, "{}: {}", library, symbols.join(", "))?;
        }
        Ok(())
    }
}

/// A declared variable and the data labels backing it.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSymbol {
    pub name: String,
    pub ty: ValueType,
    pub length: Option<usize>,
    /// Label of the value word (or the first element).
    pub symbol: String,
    /// Label of the GC type-pointer word(s); strings only.
    pub type_pointer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Float(f64),
    Str(String),
    /// Only the sign bit set, for float negation.
    SignMask,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Float(u64),
    Str(String),
    SignMask,
}

/// Replace characters assemblers and LLVM reject in labels.
///
/// `_` is the escape character, so it is doubled when it appears in a name. Every escape
/// is self-delimiting, which keeps distinct names on distinct labels.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => out.push(c),
            '_' => out.push_str("__"),
            '$' => out.push_str("_s"),
            '%' => out.push_str("_i"),
            '#' => out.push_str("_d"),
            '!' => out.push_str("_f"),
            other => out.push_str(&format!("_x{:x}_", other as u32)),
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    variables: Vec<VariableSymbol>,
    by_name: HashMap<String, usize>,
    constants: Vec<(String, Constant)>,
    constant_labels: HashMap<ConstantKey, String>,
    float_count: usize,
    string_count: usize,
    dependencies: Dependencies,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_program(program: &Program) -> Self {
        let mut table = Self::new();
        for decl in &program.variables {
            table.declare(decl);
        }
        table
    }

    /// Declare a variable. Declaring a name again replaces the earlier entry in place, so a
    /// name never owns two data symbols.
    pub fn declare(&mut self, decl: &VarDecl) {
        let base = sanitize(&decl.name);
        let symbol = VariableSymbol {
            name: decl.name.clone(),
            ty: decl.ty,
            length: decl.length,
            symbol: format!("v_{base}"),
            type_pointer: (decl.ty == ValueType::Str).then(|| format!("tp_{base}")),
        };
        match self.by_name.get(&decl.name) {
            Some(&index) => {
                warn!("variable {} declared twice; keeping the last declaration", decl.name);
                self.variables[index] = symbol;
            }
            None => {
                self.by_name.insert(decl.name.clone(), self.variables.len());
                self.variables.push(symbol);
            }
        }
    }

    pub fn variable(&self, name: &str) -> CompileResult<&VariableSymbol> {
        self.by_name
            .get(name)
            .map(|&i| &self.variables[i])
            .ok_or_else(|| CompileError::UnknownVariable { name: name.to_string() })
    }

    /// Variables in declaration order.
    pub fn variables(&self) -> &[VariableSymbol] {
        &self.variables
    }

    pub fn float_constant(&mut self, value: f64) -> String {
        let key = ConstantKey::Float(value.to_bits());
        if let Some(label) = self.constant_labels.get(&key) {
            return label.clone();
        }
        let label = format!("_float_{}", self.float_count);
        self.float_count += 1;
        self.intern(key, label, Constant::Float(value))
    }

    pub fn string_constant(&mut self, value: &str) -> String {
        let key = ConstantKey::Str(value.to_string());
        if let Some(label) = self.constant_labels.get(&key) {
            return label.clone();
        }
        let label = format!("_str_{}", self.string_count);
        self.string_count += 1;
        self.intern(key, label, Constant::Str(value.to_string()))
    }

    pub fn sign_mask(&mut self) -> String {
        if let Some(label) = self.constant_labels.get(&ConstantKey::SignMask) {
            return label.clone();
        }
        self.intern(ConstantKey::SignMask, "_sign_mask".to_string(), Constant::SignMask)
    }

    fn intern(&mut self, key: ConstantKey, label: String, constant: Constant) -> String {
        self.constant_labels.insert(key, label.clone());
        self.constants.push((label.clone(), constant));
        label
    }

    /// Constants in first-use order.
    pub fn constants(&self) -> &[(String, Constant)] {
        &self.constants
    }

    pub fn add_dependency(&mut self, function: &FunctionDescriptor) {
        self.dependencies.record(function);
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_matches_argument_types() {
        let library = Library::standard();
        let f = library.resolve("strlen", &[ValueType::Str]).unwrap();
        assert_eq!(f.value_type(), Some(ValueType::I64));

        let err = library.resolve("strlen", &[ValueType::I64]).unwrap_err();
        assert_eq!(err.to_string(), "no library function matches strlen(i64)");
        assert!(library.resolve("pow", &[ValueType::F64]).is_err());
    }

    #[test]
    fn test_variadic_accepts_extra_arguments() {
        assert!(runtime::PRINTF.accepts(&[ValueType::Str, ValueType::I64, ValueType::F64]));
        assert!(!runtime::PRINTF.accepts(&[]));
        assert!(!runtime::FREE.accepts(&[ValueType::Str, ValueType::Str]));
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let mut table = SymbolTable::new();
        let a = table.string_constant("hello");
        let b = table.float_constant(1.5);
        let c = table.string_constant("hello");
        let d = table.float_constant(-1.5);

        assert_eq!(a, "_str_0");
        assert_eq!(a, c);
        assert_eq!(b, "_float_0");
        assert_eq!(d, "_float_1");
        assert_eq!(table.constants().len(), 3);
        assert_eq!(table.sign_mask(), table.sign_mask());
        assert_eq!(table.constants().len(), 4);
    }

    #[test]
    fn test_variable_labels() {
        let program = Program::new(
            vec![
                VarDecl::scalar("name$", ValueType::Str),
                VarDecl::array("grid", ValueType::I64, 4),
            ],
            vec![],
        );
        let table = SymbolTable::from_program(&program);
        let name = table.variable("name$").unwrap();
        assert_eq!(name.symbol, "v_name_s");
        assert_eq!(name.type_pointer.as_deref(), Some("tp_name_s"));
        assert_eq!(table.variable("grid").unwrap().type_pointer, None);
        assert!(matches!(
            table.variable("missing"),
            Err(CompileError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_similar_names_get_distinct_labels() {
        let program = Program::new(
            vec![
                VarDecl::scalar("a$", ValueType::Str),
                VarDecl::scalar("a_s", ValueType::Str),
                VarDecl::scalar("a__s", ValueType::I64),
                VarDecl::scalar("a_i", ValueType::I64),
                VarDecl::scalar("a%", ValueType::I64),
            ],
            vec![],
        );
        let table = SymbolTable::from_program(&program);
        let labels: Vec<_> = table.variables().iter().map(|v| v.symbol.as_str()).collect();
        assert_eq!(labels, vec!["v_a_s", "v_a__s", "v_a____s", "v_a__i", "v_a_i"]);
        assert_eq!(table.variable("a_s").unwrap().type_pointer.as_deref(), Some("tp_a__s"));

        assert_eq!(sanitize("\u{e9}"), "_xe9_");
        assert_ne!(sanitize("\u{123}4"), sanitize("\u{1234}"));
    }

    #[test]
    fn test_redeclaration_keeps_one_entry() {
        let mut table = SymbolTable::new();
        table.declare(&VarDecl::scalar("x", ValueType::I64));
        table.declare(&VarDecl::scalar("y", ValueType::I64));
        table.declare(&VarDecl::scalar("x", ValueType::F64));

        assert_eq!(table.variables().len(), 2);
        assert_eq!(table.variables()[0].name, "x");
        assert_eq!(table.variable("x").unwrap().ty, ValueType::F64);
        assert_eq!(table.variable("y").unwrap().symbol, "v_y");
    }

    #[test]
    fn test_dependencies_are_ordered_and_unique() {
        let mut deps = Dependencies::default();
        deps.record(&runtime::STRCPY);
        deps.record(&runtime::MALLOC);
        deps.record(&runtime::STRCPY);

        let symbols: Vec<_> = deps.symbols().collect();
        assert_eq!(symbols, vec!["malloc", "strcpy"]);
        assert!(deps.contains(MSVCRT, "malloc"));
        assert!(!deps.contains(MSVCRT, "free"));
    }
}
