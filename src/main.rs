//! Walks through the life of a shared value. Run with `RUST_LOG=trace` to see the ring events.
use linked_ptr::{LinkedPtr, coerce_linked};
use log::info;

trait Greet {
    fn greet(&self) -> String;
}

struct Noisy(&'static str);

impl Greet for Noisy {
    fn greet(&self) -> String {
        format!("hello from {}", self.0)
    }
}

impl Drop for Noisy {
    fn drop(&mut self) {
        info!("dropping {}", self.0);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let p1 = LinkedPtr::new(Noisy("first"));
    let p2 = p1.clone();
    info!("two owners: unique = {}, count = {}", p1.unique(), p1.use_count());

    let greeter: LinkedPtr<dyn Greet> = coerce_linked!(p2.clone() => dyn Greet);
    info!("{}, {} owners", greeter.greet(), greeter.use_count());

    let mut p3 = LinkedPtr::new(Noisy("second"));
    p3.swap(&mut p1.clone());
    info!("after swap p3 holds {}", p3.0);

    drop(p1);
    drop(greeter);
    drop(p3);
    info!("one owner left: unique = {}", p2.unique());
}
