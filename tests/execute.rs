//! End-to-end scenarios: compile source text, execute the image, and check
//! the `print` output and machine result.

use assert_matches::assert_matches;

use metac::{runner::Trap, Error};

fn run_program(source: &str) -> (i64, String) {
    let image = metac::compile(source).expect("program compiles");
    let mut output = Vec::new();
    let result = metac::run_with_output(&image, false, &mut output).expect("program runs");
    (result, String::from_utf8(output).unwrap())
}

fn output_of(source: &str) -> String {
    run_program(source).1
}

#[test]
fn prints_constant_arithmetic() {
    assert_eq!(
        output_of("func main() begin print 2 + 3 * 4 end"),
        "14\n"
    );
}

#[test]
fn local_variable_store_and_load() {
    assert_eq!(
        output_of("func main() begin var x: int\nx := 7\nprint x end"),
        "7\n"
    );
}

#[test]
fn print_lists_values_left_to_right() {
    assert_eq!(
        output_of("func main() begin print 1 + 1, 2 * 2, 3 * 3 end"),
        "2 4 9\n"
    );
}

#[test]
fn while_loop_counts_to_ten() {
    let source = "func main() begin\n\
                  var i: int\n\
                  i := 0\n\
                  while i < 10 do begin\n\
                  print i\n\
                  i := i + 1\n\
                  end\n\
                  end";
    let expected: String = (0..10).map(|i| format!("{i}\n")).collect();
    assert_eq!(output_of(source), expected);
}

#[test]
fn while_with_false_condition_runs_zero_iterations() {
    let source = "func main() begin\n\
                  while 0 do begin\n\
                  print 123\n\
                  end\n\
                  print 7\n\
                  end";
    assert_eq!(output_of(source), "7\n");
}

#[test]
fn break_leaves_the_innermost_loop() {
    let source = "func main() begin\n\
                  var i: int\n\
                  i := 0\n\
                  while 1 do begin\n\
                  print i\n\
                  i := i + 1\n\
                  if i > 4 then break\n\
                  end\n\
                  print 99\n\
                  end";
    assert_eq!(output_of(source), "0\n1\n2\n3\n4\n99\n");
}

#[test]
fn continue_restarts_the_loop() {
    let source = "func main() begin\n\
                  var i: int\n\
                  i := 0\n\
                  while i < 10 do begin\n\
                  i := i + 1\n\
                  if i - (i / 2) * 2 = 0 then continue\n\
                  print i\n\
                  end\n\
                  end";
    assert_eq!(output_of(source), "1\n3\n5\n7\n9\n");
}

#[test]
fn if_else_takes_the_right_branch() {
    let source = "func main() begin\n\
                  var x: int\n\
                  x := 1\n\
                  if x = 1 then print 100 else print 200\n\
                  if x = 2 then print 100 else print 200\n\
                  end";
    assert_eq!(output_of(source), "100\n200\n");
}

#[test]
fn comparisons_produce_zero_or_one() {
    let source = "func main() begin\n\
                  print 3 = 3, 3 != 3, 2 < 3, 3 > 2, 3 < 2\n\
                  end";
    assert_eq!(output_of(source), "1 0 1 1 0\n");
}

#[test]
fn shifts_and_unary_minus() {
    let source = "func main() begin\n\
                  print 1 << 4, 256 >> 4, -5 + 10\n\
                  end";
    assert_eq!(output_of(source), "16 16 5\n");
}

#[test]
fn booleans_behave_as_words() {
    let source = "func main() begin\n\
                  var b: bool\n\
                  b := true\n\
                  if b then print 1\n\
                  b := false\n\
                  if b then print 2 else print 3\n\
                  end";
    assert_eq!(output_of(source), "1\n3\n");
}

#[test]
fn function_calls_pass_arguments_in_order() {
    let source = "func sub(a: int, b: int): int begin return a - b end\n\
                  func main() begin print sub(10, 4) end";
    assert_eq!(output_of(source), "6\n");
}

#[test]
fn recursion_computes_fibonacci_at_runtime() {
    let source = "func fib(n: int): int begin\n\
                  if n < 2 then return n\n\
                  return fib(n - 1) + fib(n - 2)\n\
                  end\n\
                  func main() begin print fib(10) end";
    assert_eq!(output_of(source), "55\n");
}

#[test]
fn void_function_called_for_its_side_effect() {
    let source = "func shout(n: int) begin print n, n end\n\
                  func main() begin shout(8)\nprint 1 end";
    assert_eq!(output_of(source), "8 8\n1\n");
}

#[test]
fn globals_are_shared_across_functions() {
    let source = "var counter: int\n\
                  func bump() begin counter := counter + 1 end\n\
                  func main() begin\n\
                  bump()\nbump()\nbump()\n\
                  print counter\n\
                  end";
    assert_eq!(output_of(source), "3\n");
}

#[test]
fn global_struct_member_round_trips() {
    let source = "var s: Pair\n\
                  struct Pair begin a: int, b: int end\n\
                  func main() begin\n\
                  s.b := 9\n\
                  print s.b\n\
                  end";
    assert_eq!(output_of(source), "9\n");
}

#[test]
fn global_array_sum() {
    let source = "var a: int[5]\n\
                  func main() begin\n\
                  var i: int, total: int\n\
                  i := 0\n\
                  while i < 5 do begin\n\
                  a[i] := i * i\n\
                  i := i + 1\n\
                  end\n\
                  i := 0\n\
                  total := 0\n\
                  while i < 5 do begin\n\
                  total := total + a[i]\n\
                  i := i + 1\n\
                  end\n\
                  print total\n\
                  end";
    assert_eq!(output_of(source), "30\n");
}

#[test]
fn enum_constants_compare_equal_to_their_variable() {
    let source = "enum Color begin Red, Green, Blue end\n\
                  func main() begin\n\
                  var c: Color\n\
                  c := Color.Green\n\
                  if c = Color.Green then print 1 else print 0\n\
                  print Color.Blue\n\
                  end";
    assert_eq!(output_of(source), "1\n2\n");
}

#[test]
fn comptime_call_replaces_fib_with_its_value() {
    let with_comptime = "func fib(n: int): int begin\n\
                         if n < 2 then return n\n\
                         return fib(n - 1) + fib(n - 2)\n\
                         end\n\
                         func main() begin print @call(fib(10)) end";
    let with_literal = "func fib(n: int): int begin\n\
                        if n < 2 then return n\n\
                        return fib(n - 1) + fib(n - 2)\n\
                        end\n\
                        func main() begin print 55 end";
    assert_eq!(output_of(with_comptime), "55\n");

    let first = metac::compile(with_comptime).unwrap();
    let second = metac::compile(with_literal).unwrap();
    assert_eq!(first.code(), second.code());
}

#[test]
fn comptime_chain_across_function_bodies() {
    // Resolving main's call requires a round in which the call inside
    // `a` has already been replaced.
    let source = "func main() begin print @call(a()) end\n\
                  func a(): int begin return @call(b()) + 1 end\n\
                  func b(): int begin return 10 end";
    assert_eq!(output_of(source), "11\n");
}

#[test]
fn comptime_only_functions_are_absent_from_the_final_image() {
    let source = "func @table(n: int): int begin return n * n end\n\
                  func main() begin print @call(table(9)) end";
    let image = metac::compile(source).unwrap();
    let prologues = image
        .instructions()
        .filter(|i| i.as_ref().unwrap().opcode == metac::Opcode::Funcpro)
        .count();
    // Only `main` survives into the whole-program image.
    assert_eq!(prologues, 1);
    let mut output = Vec::new();
    metac::run_with_output(&image, false, &mut output).unwrap();
    assert_eq!(output, b"81\n");
}

#[test]
fn runtime_division_by_zero_is_a_single_trap() {
    let source = "func main() begin\n\
                  var zero: int\n\
                  zero := 0\n\
                  print 7 / zero\n\
                  end";
    let image = metac::compile(source).unwrap();
    let mut output = Vec::new();
    let result = metac::run_with_output(&image, false, &mut output);
    assert_matches!(result, Err(Trap::DivisionByZero));
    assert!(output.is_empty());
}

#[test]
fn missing_main_is_rejected() {
    let result = metac::compile("func helper(): int begin return 1 end");
    assert_matches!(
        result,
        Err(Error::Compile(metac::CompileError::MissingMain))
    );
}
