// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Buffering collectors: `last_n`, `buffer`, `window`.

use crate::core::RingBuffer;
use crate::error::StreamError;
use crate::stream::hub::Hub;
use crate::stream::stream::StreamCore;
use crate::stream::{BoxSubscriber, Stream, Subscriber, Subscription, SubscriptionCore};

// ┌─────────────────────────────────────────────┐
// │ last_n                                      │
// └─────────────────────────────────────────────┘

pub(crate) struct LastNStream<T: 'static> {
    upstream: Stream<T>,
    capacity: usize,
}

impl<T: 'static> StreamCore<T> for LastNStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<T>) {
        self.upstream.subscribe_raw(Box::new(LastNSubscriber {
            downstream,
            buffer: RingBuffer::with_capacity(self.capacity),
            capacity: self.capacity,
            core: SubscriptionCore::new(),
        }));
    }
}

/// Holds the trailing `capacity` items; drains them on complete. On error
/// the buffer is discarded and the error forwarded.
struct LastNSubscriber<T> {
    downstream: BoxSubscriber<T>,
    buffer: RingBuffer<T>,
    capacity: usize,
    core: SubscriptionCore,
}

impl<T> Subscriber<T> for LastNSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.core.attach_upstream(subscription);
        self.downstream.on_subscribe(self.core.subscription());
    }

    fn on_item(&mut self, item: T) {
        if self.core.is_done() {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop();
        }
        self.buffer.add(item);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.core.is_done() {
            return;
        }
        self.buffer.clear();
        self.downstream.on_error(error);
        self.core.mark_done();
    }

    fn on_complete(&mut self) {
        if self.core.is_done() {
            return;
        }
        while let Some(item) = self.buffer.pop() {
            if self.core.is_done() {
                return;
            }
            self.downstream.on_item(item);
        }
        if self.core.is_done() {
            return;
        }
        self.downstream.on_complete();
        self.core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ buffer                                      │
// └─────────────────────────────────────────────┘

pub(crate) struct BufferStream<T: 'static> {
    upstream: Stream<T>,
    chunk_size: usize,
}

impl<T: 'static> StreamCore<Vec<T>> for BufferStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<Vec<T>>) {
        self.upstream.subscribe_raw(Box::new(BufferSubscriber {
            downstream,
            chunk: Vec::with_capacity(self.chunk_size),
            chunk_size: self.chunk_size,
            core: SubscriptionCore::new(),
        }));
    }
}

/// Emits full chunks as they fill; the final partial chunk flushes on
/// complete.
struct BufferSubscriber<T> {
    downstream: BoxSubscriber<Vec<T>>,
    chunk: Vec<T>,
    chunk_size: usize,
    core: SubscriptionCore,
}

impl<T> Subscriber<T> for BufferSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.core.attach_upstream(subscription);
        self.downstream.on_subscribe(self.core.subscription());
    }

    fn on_item(&mut self, item: T) {
        if self.core.is_done() {
            return;
        }
        self.chunk.push(item);
        if self.chunk.len() == self.chunk_size {
            let full = std::mem::replace(
                &mut self.chunk,
                Vec::with_capacity(self.chunk_size),
            );
            self.downstream.on_item(full);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if self.core.is_done() {
            return;
        }
        self.chunk.clear();
        self.downstream.on_error(error);
        self.core.mark_done();
    }

    fn on_complete(&mut self) {
        if self.core.is_done() {
            return;
        }
        if !self.chunk.is_empty() {
            let partial = std::mem::take(&mut self.chunk);
            self.downstream.on_item(partial);
            if self.core.is_done() {
                return;
            }
        }
        self.downstream.on_complete();
        self.core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ window                                      │
// └─────────────────────────────────────────────┘

pub(crate) struct WindowStream<T: Clone + 'static> {
    upstream: Stream<T>,
    window_size: usize,
}

impl<T: Clone + 'static> StreamCore<Stream<T>> for WindowStream<T> {
    fn subscribe_core(&self, downstream: BoxSubscriber<Stream<T>>) {
        self.upstream.subscribe_raw(Box::new(WindowSubscriber {
            downstream,
            current: None,
            filled: 0,
            window_size: self.window_size,
            core: SubscriptionCore::new(),
        }));
    }
}

/// Opens a fresh hub-backed sub-stream every `window_size` items. The
/// sub-stream is emitted downstream *before* its first item, so a
/// subscriber attaching synchronously observes the whole window.
struct WindowSubscriber<T: Clone + 'static> {
    downstream: BoxSubscriber<Stream<T>>,
    current: Option<Hub<T>>,
    filled: usize,
    window_size: usize,
    core: SubscriptionCore,
}

impl<T: Clone + 'static> Subscriber<T> for WindowSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.core.attach_upstream(subscription);
        self.downstream.on_subscribe(self.core.subscription());
    }

    fn on_item(&mut self, item: T) {
        if self.core.is_done() {
            return;
        }
        let hub = match &self.current {
            Some(hub) => hub.clone(),
            None => {
                let hub = Hub::subject();
                self.current = Some(hub.clone());
                self.filled = 0;
                self.downstream.on_item(hub.stream());
                if self.core.is_done() {
                    return;
                }
                hub
            }
        };
        hub.next(item);
        self.filled += 1;
        if self.filled == self.window_size {
            hub.complete();
            self.current = None;
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if self.core.is_done() {
            return;
        }
        if let Some(hub) = self.current.take() {
            hub.error(error.clone());
        }
        self.downstream.on_error(error);
        self.core.mark_done();
    }

    fn on_complete(&mut self) {
        if self.core.is_done() {
            return;
        }
        if let Some(hub) = self.current.take() {
            hub.complete();
        }
        self.downstream.on_complete();
        self.core.mark_done();
    }
}

// ┌─────────────────────────────────────────────┐
// │ Fluent surface                              │
// └─────────────────────────────────────────────┘

impl<T: 'static> Stream<T> {
    /// Remembers the trailing `capacity` items and replays them on
    /// complete.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn last_n(&self, capacity: usize) -> Stream<T> {
        assert!(capacity > 0, "last_n capacity must be greater than 0");
        Stream::from_core(
            "last_n",
            LastNStream {
                upstream: self.clone(),
                capacity,
            },
        )
    }

    /// Accumulates `chunk_size` items and emits them as one `Vec`.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is 0.
    #[must_use]
    pub fn buffer(&self, chunk_size: usize) -> Stream<Vec<T>> {
        assert!(chunk_size > 0, "buffer chunk size must be greater than 0");
        Stream::from_core(
            "buffer",
            BufferStream {
                upstream: self.clone(),
                chunk_size,
            },
        )
    }

    /// Accumulates `window_size` items and emits them as a sub-stream.
    ///
    /// # Panics
    ///
    /// Panics if `window_size` is 0.
    #[must_use]
    pub fn window(&self, window_size: usize) -> Stream<Stream<T>>
    where
        T: Clone,
    {
        assert!(window_size > 0, "window size must be greater than 0");
        Stream::from_core(
            "window",
            WindowStream {
                upstream: self.clone(),
                window_size,
            },
        )
    }
}
