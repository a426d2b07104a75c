mod dispatch;
mod host_objects;
mod peer;
