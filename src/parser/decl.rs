//! Declarations: specifier-sequences, declarators, records, enums, and the
//! top-level `parse_global` loop (§4.7).

use super::*;

impl<'a> Parser<'a> {
  /// A global declaration: a specifier-sequence, then a comma-separated
  /// list of declarators with optional initialisers (or a single function
  /// definition body).
  pub(super) fn parse_global(&mut self) {
    if self.lex.accept(";") { return }
    let (base_ty, storage, _func_specs) = self.parse_specifiers();
    if self.lex.accept(";") {
      // A bare `struct S;` / `enum E;` declaration: nothing more to do,
      // the tag has already been registered by `parse_specifiers`.
      return
    }
    loop {
      let tok = self.tok();
      let (name, ty, asm_name) = self.parse_declarator(base_ty.clone());
      let is_typedef = storage == StorageClass::Typedef;
      if is_typedef {
        self.scope.borrow_mut().insert_tag(name, NamespaceTag::Typedef, TagEntry::Typedef(ty));
      } else if ty.is_function() {
        // A function declarator followed directly by `{` is a definition:
        // it consumes its own body and is never part of a comma-list.
        let has_body = self.lex.peek_token().is_text("{");
        self.declare_function(name, ty, storage, asm_name, &tok);
        if has_body { return }
      } else {
        self.declare_global_variable(name, ty, storage, asm_name, &tok);
      }
      if !self.lex.accept(",") { break }
    }
    self.lex.expect(";", "expected ';' after declaration");
  }

  fn declare_function(&mut self, name: Atom, ty: Type, storage: StorageClass, asm_name: Atom, tok: &Token) {
    let linkage = if storage == StorageClass::Static { Linkage::Internal } else { Linkage::External };
    let existing = Scope::lookup_local_or_global_fn(&self.global, name);
    let sym = existing.unwrap_or_else(|| {
      let mut s = Symbol::new_function(name, ty.clone(), linkage);
      s.decl_token = Some(tok.clone());
      s.asm_name = asm_name;
      Rc::new(RefCell::new(s))
    });
    sym.borrow_mut().ty = Some(ty.clone());
    self.global.borrow_mut().insert_symbol(sym.clone());
    if self.lex.peek_token().is_text("{") {
      self.scope = Scope::new(ty.function().and_then(|f| f.proto_scope.clone())
        .unwrap_or_else(|| self.global.clone()));
      let prev_name = self.cur_func_name.replace(name);
      let prev_ret = self.cur_func_ret.replace(ty.function().expect("function type").ret.clone());
      let params = self.bind_parameters(&ty);
      let body = self.parse_compound_stmt();
      self.scope = self.global.clone();
      self.cur_func_name = prev_name;
      self.cur_func_ret = prev_ret;
      sym.borrow_mut().flags |= SymbolFlags::DEFINED;
      self.functions.push(FunctionDef {
        sym, params, body, variadic_offset: std::cell::Cell::new(0),
      });
    }
  }

  fn bind_parameters(&mut self, ty: &Type) -> Vec<crate::ast::Decl> {
    let f = ty.function().expect("function type");
    f.args.iter().zip(&f.arg_names).filter_map(|(t, n)| {
      let n = (*n)?;
      let sym = Rc::new(RefCell::new(Symbol::new_variable(n, t.clone(), Linkage::None)));
      sym.borrow_mut().flags |= SymbolFlags::DEFINED;
      self.scope.borrow_mut().insert_symbol(sym.clone());
      Some(crate::ast::Decl { name: n, ty: t.clone(), sym, init: None })
    }).collect()
  }

  fn declare_global_variable(&mut self, name: Atom, ty: Type, storage: StorageClass, asm_name: Atom, tok: &Token) {
    let linkage = match storage {
      StorageClass::Static => Linkage::Internal,
      StorageClass::Extern => Linkage::External,
      _ => Linkage::External,
    };
    let has_init = self.lex.accept("=");
    let init = if has_init { Some(self.parse_initializer_expr(&ty)) } else { None };
    let existing = self.global.borrow().lookup_local(name);
    let sym = existing.unwrap_or_else(|| {
      let mut s = Symbol::new_variable(name, ty.clone(), linkage);
      s.decl_token = Some(tok.clone());
      s.asm_name = asm_name;
      Rc::new(RefCell::new(s))
    });
    sym.borrow_mut().ty = Some(ty);
    if has_init {
      if sym.borrow().is_defined() {
        crate::fatal!(Loc::At(tok), "redefinition of '{}'", name);
      }
      sym.borrow_mut().flags |= SymbolFlags::DEFINED;
      sym.borrow_mut().flags.remove(SymbolFlags::TENTATIVE);
      self.global.borrow_mut().insert_symbol(sym.clone());
      // A prior tentative declaration of the same symbol already has an
      // entry (with no initialiser); replace it in place rather than
      // tracking the same global twice.
      match self.globals.iter_mut().find(|g| Rc::ptr_eq(&g.sym, &sym)) {
        Some(g) => g.init = init,
        None => self.globals.push(GlobalVar { sym, init }),
      }
    } else if storage != StorageClass::Extern {
      if !sym.borrow().is_defined() {
        sym.borrow_mut().flags |= SymbolFlags::TENTATIVE;
      }
      let already_tracked = self.globals.iter().any(|g| Rc::ptr_eq(&g.sym, &sym));
      self.global.borrow_mut().insert_symbol(sym.clone());
      if !already_tracked {
        self.globals.push(GlobalVar { sym, init: None });
      }
    } else {
      self.global.borrow_mut().insert_symbol(sym);
    }
  }

  /// Specifier-sequence: storage class, type specifiers (accumulated as
  /// flags), type qualifiers, function specifiers. "Implicit int" succeeds
  /// with a diagnostic; `long long long` is fatal; `_Atomic`/`_Alignas` are
  /// recognised but currently reject (spec.md §4.7).
  pub(super) fn parse_specifiers(&mut self) -> (Type, StorageClass, bool) {
    let mut storage = StorageClass::None;
    let mut qual = Qual::empty();
    let mut acc = TypeSpecAcc::default();
    let mut saw_any = false;
    let mut inline = false;
    loop {
      let t = self.lex.peek_token().clone();
      if !t.is(TokenKind::Alphanumeric) { break }
      let text = t.text();
      match text.as_str() {
        "typedef" => { storage = StorageClass::Typedef; self.lex.consume(); }
        "extern" => { storage = StorageClass::Extern; self.lex.consume(); }
        "static" => { storage = StorageClass::Static; self.lex.consume(); }
        "auto" => { storage = StorageClass::Auto; self.lex.consume(); }
        "register" => { storage = StorageClass::Register; self.lex.consume(); }
        "const" => { qual |= Qual::CONST; self.lex.consume(); }
        "volatile" => { qual |= Qual::VOLATILE; self.lex.consume(); }
        "restrict" => { qual |= Qual::RESTRICT; self.lex.consume(); }
        "inline" => { inline = true; self.lex.consume(); }
        "_Noreturn" => { self.lex.consume(); }
        "_Atomic" | "_Alignas" => {
          crate::fatal!(Loc::At(&t), "{text} is not yet implemented");
        }
        "__attribute__" => { self.skip_attribute(); }
        "void" => { acc.void += 1; saw_any = true; self.lex.consume(); }
        "_Bool" => { acc.bool_ += 1; saw_any = true; self.lex.consume(); }
        "char" => { acc.char_ += 1; saw_any = true; self.lex.consume(); }
        "short" => { acc.short += 1; saw_any = true; self.lex.consume(); }
        "int" => { acc.int += 1; saw_any = true; self.lex.consume(); }
        "long" => {
          acc.long += 1; saw_any = true; self.lex.consume();
          if acc.long > 2 { crate::fatal!(Loc::At(&t), "'long long long' is invalid"); }
        }
        "signed" => { acc.signed += 1; saw_any = true; self.lex.consume(); }
        "unsigned" => { acc.unsigned += 1; saw_any = true; self.lex.consume(); }
        "float" => { acc.float += 1; saw_any = true; self.lex.consume(); }
        "double" => { acc.double += 1; saw_any = true; self.lex.consume(); }
        "struct" | "union" => {
          acc.record = Some(self.parse_record_specifier(text == "struct"));
          saw_any = true;
        }
        "enum" => {
          acc.r#enum = Some(self.parse_enum_specifier());
          saw_any = true;
        }
        _ if !saw_any && acc.typedef.is_none() => {
          if let Some(TagEntry::Typedef(ty)) =
            crate::scope::lookup_tag(&self.scope, intern(&text), NamespaceTag::Typedef)
          {
            acc.typedef = Some(ty);
            saw_any = true;
            self.lex.consume();
          } else {
            break
          }
        }
        _ => break,
      }
    }
    let _ = inline;
    if !saw_any {
      crate::warn_at!(WarningKind::ImplicitInt, self.loc(), "type specifier missing, defaults to 'int'");
    }
    let base = self.resolve_type_spec(acc, qual);
    (base, storage, inline)
  }

  fn skip_attribute(&mut self) {
    self.lex.consume(); // __attribute__
    self.lex.expect("(", "expected '(' after __attribute__");
    self.lex.expect("(", "expected '((' after __attribute__");
    let mut depth = 1;
    while depth > 0 && !self.lex.peek_token().is(TokenKind::End) {
      if self.lex.peek_token().is_text("(") { depth += 1; }
      if self.lex.peek_token().is_text(")") { depth -= 1; }
      self.lex.consume();
    }
  }

  fn resolve_type_spec(&mut self, acc: TypeSpecAcc, qual: Qual) -> Type {
    if let Some(ty) = acc.record { return ty.qualify(qual) }
    if let Some(ty) = acc.r#enum { return ty.qualify(qual) }
    if let Some(ty) = acc.typedef { return ty.qualify(qual) }
    let base = if acc.bool_ > 0 { Base::Bool }
      else if acc.void > 0 { Base::Void }
      else if acc.char_ > 0 {
        if acc.signed > 0 { Base::SChar } else if acc.unsigned > 0 { Base::UChar } else { Base::Char }
      }
      else if acc.short > 0 { if acc.unsigned > 0 { Base::UShort } else { Base::SShort } }
      else if acc.long >= 2 { if acc.unsigned > 0 { Base::ULongLong } else { Base::SLongLong } }
      else if acc.long == 1 {
        if acc.double > 0 { Base::LongDouble }
        else if acc.unsigned > 0 { Base::ULong } else { Base::SLong }
      }
      else if acc.float > 0 { Base::Float }
      else if acc.double > 0 { Base::Double }
      else if acc.unsigned > 0 { Base::UInt }
      else { Base::SInt };
    Type::new_base(base, qual)
  }

  /// `struct tag { ... }` / `union tag { ... }`. Reuses an existing record
  /// declared in the current scope; a true forward declaration (no `{`)
  /// may reuse one found in any ancestor scope (spec.md §4.7).
  fn parse_record_specifier(&mut self, is_struct: bool) -> Type {
    self.lex.consume(); // struct/union
    while self.lex.peek_token().is_text("__attribute__") { self.skip_attribute(); }
    let ns = if is_struct { NamespaceTag::TagStruct } else { NamespaceTag::TagUnion };
    let named = self.lex.peek_token().is(TokenKind::Alphanumeric);
    let name = if named { let a = intern(&self.lex.peek_token().text()); self.lex.consume(); a }
      else { self.fresh_tag() };
    let opens_body = self.lex.peek_token().is_text("{");

    let existing_local = self.scope.borrow().lookup_tag_local(name, ns);
    let rec: Rc<RefCell<Record>> = if let Some(TagEntry::Tag(t)) = existing_local {
      t.record().expect("tag namespace entry is a record")
    } else if !opens_body {
      if let Some(TagEntry::Tag(t)) = crate::scope::lookup_tag(&self.scope, name, ns) {
        t.record().expect("tag namespace entry is a record")
      } else {
        let r = Rc::new(RefCell::new(Record::new(name, is_struct)));
        self.scope.borrow_mut().insert_tag(name, ns, TagEntry::Tag(Type::new_record(r.clone(), Qual::empty())));
        r
      }
    } else {
      let r = Rc::new(RefCell::new(Record::new(name, is_struct)));
      self.scope.borrow_mut().insert_tag(name, ns, TagEntry::Tag(Type::new_record(r.clone(), Qual::empty())));
      r
    };

    if opens_body {
      if rec.borrow().is_defined {
        crate::fatal!(self.loc(), "redefinition of '{}'", name);
      }
      self.lex.consume(); // '{'
      self.parse_record_members(&rec);
      self.lex.expect("}", "expected '}' to close struct/union body");
      rec.borrow_mut().finish();
      if !named {
        crate::warn_at!(WarningKind::AnonymousTags, self.loc(), "anonymous struct/union tag");
      }
    }
    Type::new_record(rec, Qual::empty())
  }

  fn parse_record_members(&mut self, rec: &Rc<RefCell<Record>>) {
    while !self.lex.peek_token().is_text("}") && !self.lex.peek_token().is(TokenKind::End) {
      let (base_ty, _storage, _) = self.parse_specifiers();
      loop {
        if self.lex.peek_token().is_text(":") {
          self.lex.consume();
          let width = crate::consteval::eval_32(&self.parse_const_expr());
          rec.borrow_mut().add(intern(""), base_ty.clone(), Some(width as u8));
        } else {
          let (name, ty, _asm) = self.parse_declarator(base_ty.clone());
          let bit_width = if self.lex.accept(":") {
            Some(crate::consteval::eval_32(&self.parse_const_expr()) as u8)
          } else { None };
          if ty.is_record() && name.is_empty() {
            let off = if rec.borrow().is_struct {
              crate::types::align_up(rec.borrow().size, ty.align())
            } else {
              0
            };
            let nested = ty.record().expect("anonymous member record");
            let snapshot = nested.borrow();
            rec.borrow_mut().flatten_anonymous(off, &snapshot);
            drop(snapshot);
            let mut rb = rec.borrow_mut();
            rb.size = rb.size.max(off + ty.size());
            rb.align = rb.align.max(ty.align());
          } else {
            rec.borrow_mut().add(name, ty, bit_width);
          }
        }
        if !self.lex.accept(",") { break }
      }
      self.lex.expect(";", "expected ';' after struct/union member");
    }
  }

  fn parse_enum_specifier(&mut self) -> Type {
    self.lex.consume(); // enum
    let named = self.lex.peek_token().is(TokenKind::Alphanumeric);
    let name = if named { let a = intern(&self.lex.peek_token().text()); self.lex.consume(); Some(a) }
      else { None };
    let opens_body = self.lex.peek_token().is_text("{");
    let tag = name.unwrap_or_else(|| self.fresh_tag());

    let existing = self.scope.borrow().lookup_tag_local(tag, NamespaceTag::TagEnum)
      .or_else(|| if opens_body { None } else { crate::scope::lookup_tag(&self.scope, tag, NamespaceTag::TagEnum) });
    let e = if let Some(TagEntry::Tag(t)) = existing { t.r#enum().expect("enum tag") }
      else {
        let e = Rc::new(RefCell::new(crate::types::Enum::new(Some(tag))));
        self.scope.borrow_mut().insert_tag(tag, NamespaceTag::TagEnum, TagEntry::Tag(Type::new_enum(e.clone(), Qual::empty())));
        e
      };

    if opens_body {
      self.lex.consume();
      let mut next_val: i64 = 0;
      loop {
        if self.lex.peek_token().is_text("}") { break }
        let ename = intern(&self.lex.peek_token().text());
        self.lex.consume();
        if self.lex.accept("=") {
          next_val = crate::consteval::eval_64(&self.parse_const_expr()).as_i64();
        }
        e.borrow_mut().values.push((ename, next_val));
        let sym = Rc::new(RefCell::new(Symbol::new_enumerator(
          ename, Type::new_enum(e.clone(), Qual::empty()), next_val)));
        self.scope.borrow_mut().insert_symbol(sym);
        next_val += 1;
        if !self.lex.accept(",") { break }
      }
      self.lex.expect("}", "expected '}' to close enum body");
    }
    Type::new_enum(e, Qual::empty())
  }

  /// Parse a declarator: optional pointer chain, then a direct-declarator
  /// (identifier, or `( declarator )`), then zero or more postfix array or
  /// function suffixes. Returns `(name, full_type, asm_name)`.
  pub(super) fn parse_declarator(&mut self, base: Type) -> (Atom, Type, Atom) {
    let ptr_ty = self.parse_pointer_chain(base);
    let (name, build) = self.parse_direct_declarator();
    let ty = build(self, ptr_ty);
    let asm_name = if self.lex.peek_token().is_text("asm") || self.lex.peek_token().is_text("__asm__") {
      self.lex.consume();
      self.lex.expect("(", "expected '(' after asm");
      let s = self.lex.peek_token().text();
      self.lex.consume();
      self.lex.expect(")", "expected ')' to close asm(\"name\")");
      intern(&s)
    } else { name };
    (name, ty, asm_name)
  }

  fn parse_pointer_chain(&mut self, base: Type) -> Type {
    let mut ty = base;
    while self.lex.accept("*") {
      let mut qual = Qual::empty();
      loop {
        let t = self.lex.peek_token().clone();
        if t.is_text("const") { qual |= Qual::CONST; self.lex.consume(); }
        else if t.is_text("volatile") { qual |= Qual::VOLATILE; self.lex.consume(); }
        else if t.is_text("restrict") { qual |= Qual::RESTRICT; self.lex.consume(); }
        else { break }
      }
      ty = Type::new_pointer(ty, qual);
    }
    ty
  }

  /// Returns the declared name (empty atom if abstract) and a closure that,
  /// given the parser and the "inner" base type, builds the full type by
  /// applying whatever postfix array/function suffixes were parsed. This
  /// mirrors C's "declarators nest inside out": `int (*f)(int)` applies the
  /// function suffix to `f`'s pointed-to type only after the parenthesised
  /// group is resolved.
  #[allow(clippy::type_complexity)]
  fn parse_direct_declarator(&mut self) -> (Atom, Box<dyn FnOnce(&mut Self, Type) -> Type + 'a>) {
    if self.lex.accept("(") {
      let (name, inner_build) = self.parse_direct_declarator();
      self.lex.expect(")", "expected ')' to close declarator group");
      let outer_build = self.parse_postfix_declarator();
      return (name, Box::new(move |p, base| {
        let with_outer = outer_build(p, base);
        inner_build(p, with_outer)
      }))
    }
    if self.lex.peek_token().is(TokenKind::Alphanumeric) {
      let name = intern(&self.lex.peek_token().text());
      self.lex.consume();
      let build = self.parse_postfix_declarator();
      return (name, build)
    }
    // Abstract declarator (no name), e.g. in a parameter list or a cast/sizeof type name.
    let build = self.parse_postfix_declarator();
    (intern(""), build)
  }

  #[allow(clippy::type_complexity)]
  fn parse_postfix_declarator(&mut self) -> Box<dyn FnOnce(&mut Self, Type) -> Type + 'a> {
    if self.lex.accept("[") {
      if self.lex.accept("]") {
        let tail = self.parse_postfix_declarator();
        return Box::new(move |p, base| { let b = tail(p, base); Type::new_indeterminate_array(b) })
      }
      // `static`/qualifiers inside `[...]` (C99 parameter array syntax) are
      // accepted and ignored; only the bound matters here.
      while matches!(self.lex.peek_token().text().as_str(), "static" | "const" | "volatile" | "restrict") {
        self.lex.consume();
      }
      let len_expr = self.parse_assign_expr();
      self.lex.expect("]", "expected ']' to close array declarator");
      let tail = self.parse_postfix_declarator();
      return Box::new(move |p, base| {
        let b = tail(p, base);
        let n = crate::consteval::eval_64(&len_expr);
        Type::new_array(b, n.as_u64())
      })
    }
    if self.lex.accept("(") {
      let (args, names, variadic) = self.parse_param_list();
      self.lex.expect(")", "expected ')' to close parameter list");
      let proto_scope = Scope::new(Some(self.scope.clone()));
      {
        let mut ps = proto_scope.borrow_mut();
        for (t, n) in args.iter().zip(&names) {
          if let Some(n) = n {
            ps.insert_symbol(Rc::new(RefCell::new(Symbol::new_variable(*n, t.clone(), Linkage::None))));
          }
        }
      }
      let tail = self.parse_postfix_declarator();
      return Box::new(move |p, base| {
        let ret = tail(p, base);
        Type::new_function(ret, args, names, variadic, Some(proto_scope))
      })
    }
    Box::new(|_, base| base)
  }

  /// Function parameter list. `(void)` is the zero-argument sentinel;
  /// `...` marks variadic and requires at least one prior argument.
  fn parse_param_list(&mut self) -> (Vec<Type>, Vec<Option<Atom>>, bool) {
    let mut args = Vec::new();
    let mut names = Vec::new();
    let mut variadic = false;
    if self.lex.peek_token().is_text(")") { return (args, names, false) }
    if self.lex.peek_token().is_text("void") {
      // Lookahead: bare `void)` means zero arguments; `void x)` (GNU
      // extension `void` as a qualified parameter) is not supported.
      let save = self.lex.peek_token().clone();
      self.lex.consume();
      if self.lex.peek_token().is_text(")") { return (args, names, false) }
      self.lex.push(save);
    }
    loop {
      if self.lex.accept("...") {
        if args.is_empty() {
          crate::fatal!(self.loc(), "variadic '...' requires at least one named parameter before it");
        }
        variadic = true;
        break
      }
      let (base_ty, _storage, _) = self.parse_specifiers();
      let (name, ty, _asm) = self.parse_declarator(base_ty);
      let ty = if ty.is_array() {
        Type::new_pointer(ty.referent().expect("array referent").clone(), Qual::empty())
      } else { ty };
      args.push(ty);
      names.push(if name.is_empty() { None } else { Some(name) });
      if !self.lex.accept(",") { break }
    }
    (args, names, variadic)
  }

  /// Parse a parenthesised type name, e.g. for `sizeof(T)` or `(T)expr`.
  pub(super) fn parse_type_name(&mut self) -> Type {
    let (base, _storage, _) = self.parse_specifiers();
    let ptr_ty = self.parse_pointer_chain(base);
    let build = self.parse_postfix_declarator();
    build(self, ptr_ty)
  }

  /// True if the next token looks like the start of a type name (used to
  /// disambiguate `(type)expr` casts from parenthesised expressions and
  /// compound literals).
  pub(super) fn at_type_start(&self) -> bool {
    let t = self.lex.peek_token();
    if !t.is(TokenKind::Alphanumeric) { return false }
    let text = t.text();
    matches!(text.as_str(),
      "void" | "char" | "short" | "int" | "long" | "signed" | "unsigned" | "float" |
      "double" | "_Bool" | "struct" | "union" | "enum" | "const" | "volatile" | "restrict")
      || crate::scope::lookup_tag(&self.scope, intern(&text), NamespaceTag::Typedef).is_some()
  }
}

impl Scope {
  /// Helper used by function (re)declaration: look up a function symbol
  /// already declared at global scope.
  fn lookup_local_or_global_fn(global: &Rc<RefCell<Scope>>, name: Atom) -> Option<SymbolRef> {
    global.borrow().lookup_local(name)
  }
}

