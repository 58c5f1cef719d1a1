use crate::container::Injector;
use crate::error::Result;

/// 组件注册函数类型
pub type ComponentRegistrar = fn(&Injector) -> Result<()>;

/// 组件注册表 - 用于 inventory 收集
///
/// 通过 `inventory::submit!` 在编译期声明组件，
/// 再由 [`Injector::load_components`] 显式加载到某个注入器中。
pub struct ComponentRegistration {
    pub name: &'static str,
    pub registrar: ComponentRegistrar,
}

impl ComponentRegistration {
    pub const fn new(name: &'static str, registrar: ComponentRegistrar) -> Self {
        Self { name, registrar }
    }
}

inventory::collect!(ComponentRegistration);

/// 获取所有通过 inventory 提交的组件
pub fn get_all_component_registrations() -> impl Iterator<Item = &'static ComponentRegistration> {
    inventory::iter::<ComponentRegistration>()
}
