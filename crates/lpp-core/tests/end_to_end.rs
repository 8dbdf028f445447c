//! Integration tests for the end-to-end preprocessing scenarios and
//! cross-cutting invariants, run against the public `Lpp` API rather than
//! internal module seams.

use lpp_core::engine::{Config, Lpp};

fn run(input: &str) -> String {
    let mut lpp = Lpp::init(Config::new("t")).expect("vm init");
    let mut out = Vec::new();
    lpp.process_stream("t", &mut input.as_bytes(), &mut out).expect("process_stream");
    String::from_utf8(out).unwrap()
}

#[test]
fn pure_document_passes_through_unchanged() {
    assert_eq!(run("hello world\n"), "hello world\n");
}

#[test]
fn lua_line_assigns_and_bare_macro_reads_it() {
    assert_eq!(run("$ x = 1\n@x"), "1");
}

#[test]
fn inline_value_with_escaped_dollar() {
    assert_eq!(run(r"price: \$$(2+2)"), "price: $4");
}

#[test]
fn macro_with_tuple_args() {
    let input = "$ function greet(who) return \"hi \"..who end\n@greet(world)\n";
    assert_eq!(run(input), "hi world\n");
}

#[test]
fn immediate_macro_splices_into_enclosing_document() {
    let input = "$ function bold(t) return \"*\"..t..\"*\" end\n@@bold(\"x\")";
    assert_eq!(run(input), "*x*");
}

#[test]
fn lua_block_resumes_document_mode_at_terminator() {
    let input = "$$$\n return 1 \n$$$@(5)";
    assert_eq!(run(input), "5");
}

#[test]
fn expansion_list_for_pure_document_is_from_zero_to_zero() {
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Rec(Rc<RefCell<Vec<(usize, usize)>>>);
    impl lpp_core::Consumer for Rec {
        fn consume_expansions(
            &mut self,
            _mp: &lpp_core::Metaprogram,
            expansions: &[lpp_core::expansion::Expansion],
        ) {
            self.0.borrow_mut().extend(expansions.iter().map(|e| (e.from, e.to)));
        }
    }

    let recorded = Rc::new(RefCell::new(Vec::new()));
    let consumer = Rec(recorded.clone());
    let mut lpp = Lpp::init(Config::new("t").with_consumer(Box::new(consumer))).expect("vm init");
    let mut out = Vec::new();
    lpp.process_stream("t", &mut "hello world\n".as_bytes(), &mut out).unwrap();

    assert_eq!(out, b"hello world\n");
    assert_eq!(*recorded.borrow(), vec![(0, 0)]);
}

#[test]
fn macro_invocation_records_expansion_at_the_symbol_offset() {
    let input = "$ function greet(who) return \"hi \"..who end\n@greet(world)\n";
    let symbol_offset = input.find('@').unwrap();

    use std::cell::RefCell;
    use std::rc::Rc;

    struct Rec(Rc<RefCell<Vec<usize>>>);
    impl lpp_core::Consumer for Rec {
        fn consume_expansions(
            &mut self,
            _mp: &lpp_core::Metaprogram,
            expansions: &[lpp_core::expansion::Expansion],
        ) {
            self.0.borrow_mut().extend(expansions.iter().map(|e| e.from));
        }
    }

    let froms = Rc::new(RefCell::new(Vec::new()));
    let consumer = Rec(froms.clone());
    let mut lpp = Lpp::init(Config::new("t").with_consumer(Box::new(consumer))).expect("vm init");
    let mut out = Vec::new();
    lpp.process_stream("t", &mut input.as_bytes(), &mut out).unwrap();

    assert!(froms.borrow().contains(&symbol_offset));
}

#[test]
fn cancelled_macro_aborts_without_surfacing_an_error() {
    let input = "$ function c() lpp.cancel() end\n@c()tail";
    let mut lpp = Lpp::init(Config::new("t")).expect("vm init");
    let mut out = Vec::new();
    let result = lpp.process_stream("t", &mut input.as_bytes(), &mut out);
    assert!(result.is_ok());
}

#[test]
fn script_runtime_error_surfaces_as_an_error_result() {
    let input = "$ function boom() error(\"kaboom\") end\n@boom()";
    let mut lpp = Lpp::init(Config::new("t")).expect("vm init");
    let mut out = Vec::new();
    let result = lpp.process_stream("t", &mut input.as_bytes(), &mut out);
    assert!(result.is_err());
}
