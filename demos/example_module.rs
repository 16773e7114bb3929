use std::time::Duration;

use console::style;
use seisan::{Context, Key, Present, Produced, Promise, RayonPool, Registry};

struct Foo;
struct Bar;
struct Baz;

fn registry() -> anyhow::Result<Registry> {
    let mut builder = Registry::builder();

    let number = builder
        .producer()
        .name("someNumber")
        .run(|()| Ok(42_i32))?;

    let foo = builder
        .producer()
        .name("produceFoo")
        .marked::<Foo>()
        .run(|()| Ok("foo".to_string()))?;

    let bar = builder
        .producer()
        .name("produceBar")
        .marked::<Bar>()
        .depends_on(foo)
        .run(|foo: Present<String>| Ok(format!("bar[{}]", foo.get()?)))?;

    let long = builder
        .producer()
        .name("produceLong")
        .run_deferred(|()| {
            let (promise, completer) = Promise::channel();
            std::thread::spawn(move || {
                // Thinking....
                std::thread::sleep(Duration::from_secs(1));
                completer.succeed(1234_i64);
            });
            Ok(Produced::Deferred(promise))
        })?;

    let strings = builder
        .producer()
        .name("produceWholeBunchOfString")
        .run(|()| Ok(vec!["woop".to_string(), "woop".to_string()]))?;

    builder
        .producer()
        .name("someString")
        .depends_on((strings, bar, number, long, Key::<f64>::marked::<Baz>()))
        .run(
            |(strings, bar, number, long, explicit): (
                Present<Vec<String>>,
                Present<String>,
                Present<i32>,
                Present<i64>,
                Present<f64>,
            )| {
                Ok(format!(
                    "The numbers were: [{}, {:.6}], bar: {}. Async number: {}. Strings: {:?}",
                    number.get()?,
                    explicit.get()?,
                    bar.get()?,
                    long.get()?,
                    strings.get()?,
                ))
            },
        )?;

    Ok(builder.build())
}

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "logging")]
    seisan::init_logging()?;

    let pool = RayonPool::builder().thread_name("producer").build()?;
    let context = Context::new(registry()?, pool);

    eprintln!("{}", style("Available keys:").bold());
    for key in context.available_keys() {
        eprintln!("  {}", style(key).cyan());
    }

    let mut graph = context.new_graph(Key::<String>::new())?;
    graph.add_input(Key::<f64>::marked::<Baz>(), 1337.0)?;

    eprintln!("{}", style("Plan:").bold());
    eprintln!("{}", graph.plan());

    let result = graph.run().wait()?;
    eprintln!("{} {}", style("Result:").green().bold(), result);

    Ok(())
}
