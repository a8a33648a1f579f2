use criterion::{black_box, criterion_group, criterion_main, Criterion};
use minim_engine::Value;

const SOURCE: &str = r"
(define (fact n)
  (if (= n 1)
      1
      (* n (fact (- n 1)))))
";

fn factorial_benchmark(c: &mut Criterion) {
    let env = minim_engine::new_env().unwrap();
    minim_engine::eval_str(&env, SOURCE).unwrap();

    let fact = env.borrow().lookup("fact").expect("variable 'fact' not found");
    let args: Vec<Value> = vec![Value::Int(15)];

    c.bench_function("fact 15", |b| {
        b.iter(|| minim_engine::call(black_box(&fact), black_box(&args)))
    });
}

criterion_group!(benches, factorial_benchmark);
criterion_main!(benches);
