/*
 * Copyright (c) 2022 Shi Lei
 *
 * Use of this source code is governed by a MIT-style license
 * that can be found in the LICENSE file or
 * at https://opensource.org/licenses/MIT
 */

use core::alloc::Layout;
use core::arch::asm;
use core::mem;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicU32, Ordering};
use alloc::alloc::alloc_zeroed;
use alloc::rc::Rc;
use alloc::string::String;

use core::ptr::NonNull;

use crate::arch::smp::arch_curr_cpu_num;
use crate::dispatch::header::DispatchHeader;
use crate::dispatch::wait::{WaitBlock, WaitMode};
use crate::errors::ErrNO;
use crate::klib::list::{Linked, List, ListNode};
use crate::locking::mutex::Mutex;
use crate::ZX_ASSERT;
use crate::percpu::{PerCPU, BOOT_CPU_ID, PERCPU_ARRAY};
use crate::arch::irq::arch_irqs_disabled;
use crate::sched::{SchedulerState, Scheduler};
use crate::timer::Timer;
use crate::vm::kstack::KernelStack;

pub const THREAD_FLAG_DETACHED:     u32 = 1 << 0;
pub const THREAD_FLAG_FREE_STRUCT:  u32 = 1 << 1;
/*
pub const THREAD_FLAG_IDLE                     (1 << 2)
pub const THREAD_FLAG_VCPU                     (1 << 3)

pub const THREAD_SIGNAL_KILL                   (1 << 0)
pub const THREAD_SIGNAL_SUSPEND                (1 << 1)
pub const THREAD_SIGNAL_POLICY_EXCEPTION       (1 << 2)
*/

#[allow(dead_code)]
pub struct ThreadArg {
}

impl ThreadArg {
    const fn _new() -> Self {
        Self {
        }
    }
}

type ThreadStartEntry = fn(Option<ThreadArg>) -> Result<(), ErrNO>;
type _ThreadTrampolineEntry = dyn Fn();

fn dummy_thread_start_entry(_arg: Option<ThreadArg>) -> Result<(), ErrNO> {
    panic!("Please implement it!");
}

/*
 * ThreadInfo is included in Thread at an offset of 0.
 * This means that tp points to both ThreadInfo and Thread.
 */
pub struct ThreadInfo {
    flags: u32,             /* low level flags */
    _preempt_count: i32,    /* 0=>preemptible, <0=>BUG */
    //kernel_sp: usize,     /* Kernel stack pointer */
    //user_sp: usize,       /* User stack pointer */
    pub cpu: usize,
    /* current IPL of the hart this thread is running on. Lives here,
     * rather than in PerCPU, so it is reachable before PERCPU_ARRAY
     * is populated (tp always points at a valid ThreadInfo). */
    pub ipl: crate::ipl::ipl_t,
}

impl ThreadInfo {
    pub fn current() -> &'static mut ThreadInfo {
        unsafe {
            &mut *(thread_get_current() as *mut ThreadInfo)
        }
    }

    const fn new() -> Self {
        Self {
            flags: 0,
            _preempt_count: 0,
            cpu: 0,
            ipl: crate::ipl::IPL_PASSIVE,
        }
    }
}

pub struct PreemptionState {
    // state_ contains three fields:
    //
    //  * a 15-bit preempt disable counter (bits 0-14)
    //  * a 15-bit eager resched disable counter (bits 15-29)
    //  * a 2-bit for TimesliceExtensionFlags (bits 30-31)
    //
    // This is a single field so that both counters and the flags can be compared
    // against zero with a single memory access and comparison.
    //
    // state_'s counts are modified by interrupt handlers, but the counts are
    // always restored to their original value before the interrupt handler
    // returns, so modifications are not visible to the interrupted thread.
    state: AtomicU32,
}

impl PreemptionState {
    // Counters contained in state_ are limited to 15 bits.
    const K_MAX_COUNT_VALUE: u32 = 0x7fff;
    // The preempt disable count is in the lowest 15 bits.
    const K_PREEMPT_DISABLE_MASK: u32 = Self::K_MAX_COUNT_VALUE;

    const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    // PreemptDisable() increments the preempt disable counter for the current
    // thread. While preempt disable is non-zero, preemption of the thread is
    // disabled, including preemption from interrupt handlers. During this time,
    // any call to Reschedule() will only record that a reschedule is pending, and
    // won't do a context switch.
    //
    // Note that this does not disallow blocking operations (e.g.
    // mutex.Acquire()). Disabling preemption does not prevent switching away from
    // the current thread if it blocks.
    //
    // A call to PreemptDisable() must be matched by a later call to
    // PreemptReenable() to decrement the preempt disable counter.
    fn preempt_disable(&self) {
        let old_state = self.state.fetch_add(1, Ordering::Relaxed);
        ZX_ASSERT!(Self::preempt_disable_count(old_state) < Self::K_MAX_COUNT_VALUE);
    }

    fn preempt_disable_count(state: u32) -> u32 {
        state & Self::K_PREEMPT_DISABLE_MASK
    }
}

// TaskState is responsible for running the task defined by
// |entry(arg)|, and reporting its value to any joining threads.
pub struct TaskState {
    /* The Thread's entry point, and its argument. */
    entry: ThreadStartEntry,
    arg: Option<ThreadArg>,
}

impl TaskState {
    const fn new() -> Self {
        Self {
            entry: dummy_thread_start_entry,
            arg: None,
        }
    }

    fn init(&mut self, entry: ThreadStartEntry, arg: Option<ThreadArg>) {
        self.entry = entry;
        self.arg = arg;
    }
}

pub struct Thread {
    pub thread_info: ThreadInfo,
    queue_node: ListNode,
    name: String,
    percpu: *mut PerCPU,
    pub sched_state: SchedulerState,
    pub task_state: TaskState,
    pub preemption_state: PreemptionState,
    pub stack: KernelStack,

    /* Blocks this thread has pushed onto dispatch objects it's currently
     * waiting on (see dispatch::wait::{wait_one, wait_many}). Fixed-size
     * because a thread can never wait on more objects than zx_wait_many
     * allows in one call. */
    wait_blocks: [WaitBlock; Self::MAX_WAIT_OBJECTS],
    wait_block_count: usize,
    /* Set by wait_many() for the duration of an outstanding All-mode wait:
     * the same try_consume closure the caller gave it, so wake_waiters()
     * can consume every one of this thread's pending headers atomically
     * once it discovers they are all simultaneously signalled. None
     * outside of an All-mode wait_many() call. */
    pub wait_all_consume: Option<Rc<dyn Fn(&mut DispatchHeader) -> bool>>,
    /* Set by sched::unblock()/unblock_with_result() once this thread has
     * been woken; consumed and cleared by sched::block_current(). */
    pub wait_result: Option<Result<(), ErrNO>>,
    /* Armed by arm_wait_timer() for a bounded wait; its DPC fires
     * WaitTimedOut into wait_result if nothing else woke this thread
     * first. */
    pub wait_timer: Timer,
}

unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Linked<Thread> for Thread {
    fn from_node(ptr: core::ptr::NonNull<ListNode>) -> Option<core::ptr::NonNull<Thread>> {
        unsafe {
            Some(crate::container_of!(ptr, Thread, queue_node))
        }
    }

    fn into_node(&mut self) -> &mut ListNode {
        &mut (self.queue_node)
    }
}

impl Thread {
    /* thread priority */
    const NUM_PRIORITIES: usize = 32;
    pub const MAX_WAIT_OBJECTS: usize = 8;

    const _LOWEST_PRIORITY:  usize = 0;
    pub const HIGHEST_PRIORITY: usize = Self::NUM_PRIORITIES - 1;
    const _DPC_PRIORITY:     usize = Self::NUM_PRIORITIES - 2;
    const _IDLE_PRIORITY:    usize = Self::_LOWEST_PRIORITY;
    const _LOW_PRIORITY:     usize = Self::NUM_PRIORITIES / 4;
    pub const DEFAULT_PRIORITY: usize = Self::NUM_PRIORITIES / 2;
    pub const HIGH_PRIORITY:    usize = (Self::NUM_PRIORITIES / 4) * 3;

    #[allow(dead_code)]
    pub fn current() -> &'static mut Thread {
        unsafe {
            &mut *(thread_get_current() as *mut Thread)
        }
    }

    pub const fn new() -> Self {
        Self {
            thread_info: ThreadInfo::new(),
            queue_node: ListNode::new(),
            name: String::new(),
            percpu: null_mut(),
            sched_state: SchedulerState::new(),
            task_state: TaskState::new(),
            preemption_state: PreemptionState::new(),
            stack: KernelStack::new(),
            wait_blocks: [
                WaitBlock::new(), WaitBlock::new(), WaitBlock::new(), WaitBlock::new(),
                WaitBlock::new(), WaitBlock::new(), WaitBlock::new(), WaitBlock::new(),
            ],
            wait_block_count: 0,
            wait_all_consume: None,
            wait_result: None,
            wait_timer: Timer::new(),
        }
    }

    /* Claims the next free wait-block slot for `header`, links it in, and
     * hands back a stable pointer the caller splices into the header's
     * waiter queue. Panics if a thread ever tries to wait on more than
     * MAX_WAIT_OBJECTS objects at once. */
    pub fn push_wait_block(&mut self, header: *mut crate::dispatch::header::DispatchHeader,
                            mode: WaitMode)
        -> NonNull<WaitBlock>
    {
        ZX_ASSERT!(self.wait_block_count < Self::MAX_WAIT_OBJECTS);
        let idx = self.wait_block_count;
        self.wait_block_count += 1;

        let wb = &mut self.wait_blocks[idx];
        *wb = WaitBlock::new();
        wb.thread = self as *mut Thread as ThreadPtr;
        wb.header = header;
        wb.mode = mode;
        NonNull::new(wb as *mut WaitBlock).unwrap()
    }

    /* Wait blocks currently pushed against this thread's in-flight wait,
     * in push order. Used by wake_waiters() to check or consume every
     * header an All-mode waiter is pending on. */
    pub fn wait_blocks(&self) -> &[WaitBlock] {
        &self.wait_blocks[..self.wait_block_count]
    }

    pub fn wait_blocks_mut(&mut self) -> &mut [WaitBlock] {
        &mut self.wait_blocks[..self.wait_block_count]
    }

    /* Releases the wait block this thread holds against `header`. Safe to
     * call whether or not wake_waiters() already unlinked it from the
     * header's queue. */
    pub fn pop_wait_block(&mut self, header: *mut crate::dispatch::header::DispatchHeader) {
        let pos = (0..self.wait_block_count).find(|&i| self.wait_blocks[i].header == header);
        if let Some(pos) = pos {
            self.wait_blocks[pos].delete_from_list();
            self.wait_block_count -= 1;
            if pos != self.wait_block_count {
                self.wait_blocks.swap(pos, self.wait_block_count);
            }
            self.wait_blocks[self.wait_block_count] = WaitBlock::new();
        }
    }

    /* Arms this thread's wait timer to fire WaitTimedOut at `deadline`
     * (absolute hardclock ticks) unless something else wakes it first. */
    pub fn arm_wait_timer(&mut self, deadline: u64) {
        let thread_ptr = self as *mut Thread as usize;
        self.wait_timer.init(Self::wait_timeout_dpc, thread_ptr);

        let cpu = arch_curr_cpu_num();
        let mut percpu_array = unsafe { PERCPU_ARRAY.lock() };
        let percpu = percpu_array.get(cpu);
        let timer = NonNull::new(&mut self.wait_timer as *mut Timer).unwrap();
        percpu.timer_queue.enqueue(timer, deadline, cpu);
    }

    fn wait_timeout_dpc(dpc: &mut crate::dpc::Dpc) {
        let thread_ptr = dpc.arg;
        crate::sched::unblock_with_result(thread_ptr, Err(ErrNO::WaitTimedOut));
    }

    pub fn percpu(&self) -> &mut PerCPU {
        ZX_ASSERT!(!self.percpu.is_null());
        unsafe { &mut (*self.percpu) }
    }

    #[allow(dead_code)]
    pub fn percpu_ptr(&self) -> *mut PerCPU {
        ZX_ASSERT!(!self.percpu.is_null());
        self.percpu
    }

    #[allow(dead_code)]
    pub fn set_percpu_ptr(&mut self, ptr: *mut PerCPU) {
        ZX_ASSERT!(self.percpu.is_null());
        self.percpu = ptr;
    }

    #[allow(dead_code)]
    pub fn create(name: &str, entry: ThreadStartEntry, arg: Option<ThreadArg>,
                  priority: usize) -> Result<*mut Thread, ErrNO> {
        Thread::create_etc(null_mut(), name, entry, arg, priority, None)
    }

    /*
     * @brief  Create a new thread
     *
     * This function creates a new thread. The thread is initially suspended,
     * so you need to call resume() to execute it.
     *
     * @param  t               If not nullptr, use the supplied Thread
     * @param  name            Name of thread
     * @param  entry           Entry point of thread
     * @param  arg             Arbitrary argument passed to entry(). It can be null.
     *                         in which case |user_thread| will be used.
     * @param  priority        Execution priority for the thread.
     * @param  alt_trampoline  If not nullptr, an alternate trampoline for the thread
     *                         to start on.
     *
     * Thread priority is an integer from 0 (lowest) to 31 (highest).
     *
     *  HIGHEST_PRIORITY
     *  DPC_PRIORITY
     *  HIGH_PRIORITY
     *  DEFAULT_PRIORITY
     *  LOW_PRIORITY
     *  IDLE_PRIORITY
     *  LOWEST_PRIORITY
     *
     * Stack size is set to DEFAULT_STACK_SIZE
     *
     * @return  Pointer to thread object, or nullptr on failure.
     */
    fn create_etc(thread_in: *mut Thread, name: &str,
                  entry: ThreadStartEntry, arg: Option<ThreadArg>,
                  priority: usize,
                  _alt_trampoline: Option<&_ThreadTrampolineEntry>)
        -> Result<*mut Thread, ErrNO>
    {
        let mut flags: u32 = 0;

        let thread = if thread_in == null_mut() {
            flags |= THREAD_FLAG_FREE_STRUCT;
            alloc::boxed::Box::into_raw(alloc::boxed::Box::new(Thread::new()))
        } else {
            thread_in
        };

        /* thread is at least as aligned as the thread is supposed to be */
        ZX_ASSERT!(IS_ALIGNED!(thread as usize, mem::align_of::<Thread>()));

        construct_thread(thread, name);

        unsafe {
            (*thread).thread_info.flags |= flags;
            (*thread).task_state.init(entry, arg);
        }
        Scheduler::init_thread(thread, priority);

        unsafe {
            (*thread).stack.init()?;
        }

        {
            let mut thread_list = THREAD_LIST.lock();
            thread_list.add_tail(core::ptr::NonNull::new(thread).unwrap());
        }

        Ok(thread)
    }

    /* Thread exit/join isn't implemented yet, so detaching just clears
     * the flag that would otherwise make exit wait for a joiner. */
    #[allow(dead_code)]
    pub fn detach(&mut self) {
        self.set_detached(true);
    }

    /* Makes a suspended thread executable by putting it back on a run
     * queue. Called once after create_etc() to start a new thread. */
    #[allow(dead_code)]
    pub fn resume(&mut self) {
        crate::sched::unblock(self as *mut Thread as ThreadPtr);
    }

    fn set_name(&mut self, name: &str) {
        self.name = String::from(name);
    }

    #[allow(dead_code)]
    fn detatched(&self) -> bool {
        (self.thread_info.flags & THREAD_FLAG_DETACHED) != 0
    }

    fn set_detached(&mut self, detatched: bool) {
        if detatched {
            self.thread_info.flags |= THREAD_FLAG_DETACHED;
        } else {
            self.thread_info.flags &= !THREAD_FLAG_DETACHED;
        }
    }

    pub fn sched_state(&mut self) -> &mut SchedulerState {
        &mut self.sched_state
    }
}

/* get us into some sort of thread context so Thread::Current works. */
pub fn thread_init_early() {
    construct_boot_percpu();

    ZX_ASSERT!(arch_curr_cpu_num() == 0);

    /* Initialize the thread list. */
    THREAD_LIST.lock().init();

    /* Init the boot percpu data. */
    PerCPU::init_boot();
}

fn construct_boot_percpu() {
    let layout = Layout::new::<PerCPU>();
    unsafe {
        let boot_percpu = alloc_zeroed(layout) as *mut PerCPU;
        (*boot_percpu).init();

        let t = (*boot_percpu).idle_thread_ptr();
        (*t).thread_info.cpu = BOOT_CPU_ID;
        (*t).percpu = boot_percpu;
        thread_set_current(t as usize);

        let mut percpu_array = PERCPU_ARRAY.lock();
        percpu_array.set(BOOT_CPU_ID, boot_percpu);
    }
}

/**
 * @brief Construct a thread t around the current running state
 *
 * This should be called once per CPU initialization.  It will create
 * a thread that is pinned to the current CPU and running at the
 * highest priority.
 */
pub fn thread_construct_first(thread: *mut Thread, name: &str) {
    ZX_ASSERT!(arch_irqs_disabled());

    construct_thread(thread, name);
    unsafe {
        (*thread).set_detached(true);
    }

    /* Setup the scheduler state. */
    Scheduler::init_first_thread(thread);

    /* Start out with preemption disabled to avoid attempts to reschedule
     * until threading is fulling enabled. This simplifies code paths shared
     * between initialization and runtime (e.g. logging). Preemption is enabled
     * when the idle thread for the current CPU is ready. */
    unsafe {
        (*thread).preemption_state.preempt_disable();
    }

    arch_thread_construct_first(thread);

    {
        let mut thread_list = THREAD_LIST.lock();
        thread_list.add_tail(core::ptr::NonNull::new(thread).unwrap());
    }
}

fn arch_thread_construct_first(_t: *mut Thread) {
}

fn construct_thread(thread: *mut Thread, name: &str) {
    unsafe {
        (*thread).set_name(name);
    }
}

#[inline(always)]
pub fn thread_set_current(current: usize) {
    unsafe {
        asm!(
            "mv tp, a0",
            in("a0") current
        );
    }
}

#[inline(always)]
pub fn thread_get_current() -> usize {
    let current: usize;
    unsafe {
        asm!(
            "mv a0, tp",
            out("a0") current
        );
    }
    current
}

pub type ThreadPtr = usize;

pub static THREAD_LIST: Mutex<List<Thread>> = Mutex::new(List::<Thread>::new());