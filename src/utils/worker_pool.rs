use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, Receiver};
use crossbeam::thread::scope;

/// Items carrying their position in the output order.
pub trait Orderable {
    fn index(&self) -> usize;
}

/// Fan work items out over `threads` workers and hand results to the
/// postprocessor strictly in index order, regardless of completion order.
pub fn worker_pool<U, T, W, P>(
    threads: usize,
    out_capacity: usize,
    in_receiver: Receiver<U>,
    worker: W,
    mut postprocessor: P,
) -> Result<()>
where
    U: Send,
    T: Send + Orderable,
    W: Fn(U) -> Result<T> + Sync,
    P: FnMut(T) -> Result<()> + Send,
{
    scope(|scope| -> Result<()> {
        let (out_sender, out_receiver) = bounded::<Result<T>>(out_capacity.max(1));
        for _ in 0..threads.max(1) {
            let in_receiver = in_receiver.clone();
            let out_sender = out_sender.clone();
            let worker = &worker;
            scope.spawn(move |_| {
                for item in in_receiver {
                    if out_sender.send(worker(item)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_sender);

        // release the continuous prefix in order
        let mut pending: BTreeMap<usize, T> = BTreeMap::new();
        let mut next_index = 0usize;
        for item in out_receiver {
            let item = item?;
            pending.insert(item.index(), item);
            while let Some(item) = pending.remove(&next_index) {
                postprocessor(item)?;
                next_index += 1;
            }
        }
        for (_, item) in pending {
            postprocessor(item)?;
        }
        Ok(())
    })
    .map_err(|_| anyhow!("worker pool thread panicked"))?
}
