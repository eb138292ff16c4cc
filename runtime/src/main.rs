use clap::Parser as ClapParser;
use std::{
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use heap::{BlockCollector, Collector, HeapSettings, NoCollector};
use log::{info, warn};
use object::Value;
use runtime::{
    BindFlags, CallDescriptor, ExecutionContext, FluidId, Invoke, RuntimeError,
    Vm, VmCreateInfo, allocate_string, allocate_words, bind_kwargs, cons,
    from_double, push_fluid, push_wind, spawn_with_context, string_length,
    unwind_to,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Heap size in MiB
    #[arg(long, default_value_t = 64)]
    heap_size: usize,

    /// Block size in KiB
    #[arg(long, default_value_t = 32)]
    block_size: usize,

    /// Iterations per thread
    #[arg(long, default_value_t = 10_000)]
    iterations: usize,

    /// Threads, each with its own execution context
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// List length and dynamic-stack depth per iteration
    #[arg(long, default_value_t = 16)]
    depth: usize,
}

/// Fixnums are procedures that do nothing but get counted.
#[derive(Default)]
struct CountingInvoke {
    calls: AtomicUsize,
}

impl Invoke for CountingInvoke {
    fn invoke(
        &self,
        _ctx: &mut ExecutionContext,
        procedure: Value,
    ) -> Result<(), RuntimeError> {
        if !procedure.is_fixnum() {
            return Err(RuntimeError::NotApplicable { procedure });
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Summary {
    conses: usize,
    bindings: usize,
    binds: usize,
    characters: usize,
}

fn iteration(
    ctx: &mut ExecutionContext,
    fluid: FluidId,
    desc: &CallDescriptor,
    code: &[u32],
    depth: usize,
    summary: &mut Summary,
) -> Result<(), RuntimeError> {
    let fp = ctx.stack.len();

    // a rooted list, rebuilt every iteration
    ctx.stack.push(Value::NIL);
    for i in 0..depth {
        let tail = ctx.stack[fp];
        let pair = cons(ctx, Value::from_i64(i as i64), tail);
        ctx.stack[fp] = pair;
    }
    summary.conses += depth;

    let boxed = from_double(ctx, depth as f64);
    ctx.stack.push(boxed);
    let block = allocate_words(ctx, object::ObjectType::Vector, depth as u32);
    ctx.stack.push(block.value());

    let base_depth = ctx.dynstack.depth();
    for i in 0..depth {
        if i % 2 == 0 {
            push_fluid(ctx, fluid, Value::from_i64(i as i64));
        } else {
            push_wind(ctx, Value::from_i64(0), Value::from_i64(1))?;
        }
    }
    summary.bindings += depth;
    unwind_to(ctx, base_depth)?;

    let args_at = ctx.stack.len();
    let x = ctx.vm().keywords.intern("x");
    ctx.stack
        .extend([Value::from_i64(1), Value::from_i64(2), x, Value::from_i64(3)]);
    bind_kwargs(
        ctx,
        args_at,
        0,
        4,
        code,
        0,
        desc.nreq,
        desc.flags,
        desc.nreq + desc.nopt,
        desc.ntotal,
        desc.kw_offset,
    )?;
    summary.binds += 1;

    let s = allocate_string(ctx, "λ-stress");
    // SAFETY: freshly allocated string
    summary.characters += unsafe { string_length(s) };

    ctx.stack.truncate(fp);
    Ok(())
}

fn run(
    ctx: &mut ExecutionContext,
    iterations: usize,
    depth: usize,
) -> Result<Summary, RuntimeError> {
    let fluid = ctx.vm().fluids.make_fluid(Value::FALSE);
    let x = ctx.vm().keywords.intern("x");
    let y = ctx.vm().keywords.intern("y");
    let desc = CallDescriptor::new(2, 1, 5, BindFlags::ALLOW_OTHER_KEYS)
        .with_keyword(x, 3)
        .with_keyword(y, 4);
    let mut code = Vec::new();
    desc.encode_keywords(&mut code);

    let mut summary = Summary::default();
    for _ in 0..iterations {
        iteration(ctx, fluid, &desc, &code, depth, &mut summary)?;
    }
    Ok(summary)
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let heap = HeapSettings {
        heap_size: cli.heap_size * 1024 * 1024,
        block_size: cli.block_size * 1024,
        ..Default::default()
    };
    let collector: Box<dyn Collector> = if cli.threads == 1 {
        Box::new(BlockCollector)
    } else {
        warn!("{} threads share the heap; collection disabled", cli.threads);
        Box::new(NoCollector)
    };
    let invoker = Arc::new(CountingInvoke::default());

    let vm = match Vm::new(VmCreateInfo {
        heap,
        collector,
        invoker: invoker.clone(),
        ..Default::default()
    }) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("Invalid heap settings: {err}");
            process::exit(1);
        }
    };

    let start = Instant::now();
    let threads: Vec<_> = (0..cli.threads)
        .map(|_| {
            let (iterations, depth) = (cli.iterations, cli.depth);
            spawn_with_context(&vm, move |ctx| run(ctx, iterations, depth))
        })
        .collect();

    let mut total = Summary::default();
    for (i, thread) in threads.into_iter().enumerate() {
        match thread.join() {
            Ok(Ok(summary)) => {
                info!("thread {i}: {summary:?}");
                total.conses += summary.conses;
                total.bindings += summary.bindings;
                total.binds += summary.binds;
                total.characters += summary.characters;
            }
            Ok(Err(err)) => {
                eprintln!("thread {i} failed: {err}");
                process::exit(1);
            }
            Err(_) => {
                eprintln!("thread {i} panicked");
                process::exit(1);
            }
        }
    }
    let elapsed = start.elapsed();

    let stats = &vm.heap.stats;
    println!("threads:            {}", cli.threads);
    println!("conses:             {}", total.conses);
    println!("dynamic bindings:   {}", total.bindings);
    println!("keyword binds:      {}", total.binds);
    println!("string characters:  {}", total.characters);
    println!("procedure calls:    {}", invoker.calls.load(Ordering::Relaxed));
    println!(
        "blocks handed out:  {}",
        stats.blocks_handed_out.load(Ordering::Relaxed)
    );
    println!(
        "collections:        {}",
        stats.collections.load(Ordering::Relaxed)
    );
    println!("elapsed:            {elapsed:?}");
}
