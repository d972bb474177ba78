use wgt::Backend;

pub trait HalApi: hal::Api + 'static {
    const VARIANT: Backend;
}

impl HalApi for hal::api::Noop {
    const VARIANT: Backend = Backend::Noop;
}
