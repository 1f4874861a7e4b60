//! Runs a coroutine that waits on `a`, `b`, `c` and `d`, then resolves `a` and `b` from outside.
//!
//! Set `RUST_LOG=lazyco=trace` to watch the coroutine suspend and resume.

use lazyco::{wait, Builder, Lazy, LazyError};

use tracing_subscriber::EnvFilter;

fn print(name: &str, value: i32) {
    println!("{}: {}", name, value);
}

fn main() -> Result<(), LazyError> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .finish();
    // Only fails if another subscriber is installed, which leaves us with that one.
    let _ = tracing::subscriber::set_global_default(subscriber);

    let a: Lazy<i32> = Lazy::new();
    let b: Lazy<i32> = Lazy::new();
    let c = &a + 1;
    let d = &a + &b + &c + &c;

    let co = {
        let (a, b, c, d) = (a.clone(), b.clone(), c.clone(), d.clone());
        Builder::new().name("demo").start(move |co| async move {
            println!("inside coroutine");
            let (x, y) = (wait!(co, a)?, wait!(co, b)?);
            println!("{},{}", x, y);
            println!("{}", wait!(co, c)?);
            println!("{}", wait!(co, d)?);
            Ok::<_, LazyError>(())
        })
    };

    a.resolve(10);
    b.resolve(5);

    print("a", a.get());
    print("b", b.get());
    print("c", c.get());
    print("d", d.get());

    co.completion().get()
}
