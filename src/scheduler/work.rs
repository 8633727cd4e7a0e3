use super::worker::GCWorker;

/// A unit of collector work. Works are boxed, queued on the scheduler and executed by whichever
/// worker (or the pause thread) pops them.
pub trait GCWork: 'static + Send {
    fn do_work(&mut self, worker: &mut GCWorker);

    /// Name used in trace logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Any one-shot closure can be scheduled as a work.
impl<F: FnMut(&mut GCWorker) + Send + 'static> GCWork for F {
    fn do_work(&mut self, worker: &mut GCWorker) {
        self(worker)
    }
}
