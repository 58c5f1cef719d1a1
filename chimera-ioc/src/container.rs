use crate::component::get_all_component_registrations;
use crate::error::{IocError, Result};
use crate::instance::Instance;
use crate::invoke::Target;
use crate::metadata::TypeMeta;
use crate::post_processor::InstancePostProcessor;
use crate::scope::Scope;
use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// 容器 trait - 织入层依赖的最小接口
///
/// 一个容器就是一个作用域：可以判断自己是否拥有某个类型、按类型名解析实例，
/// 并把标识符解析为类型描述。
pub trait Container: Send + Sync {
    /// 作用域名称
    fn scope_name(&self) -> &str;

    /// 当前作用域是否直接注册了该类型
    fn owns(&self, type_name: &str) -> bool;

    /// 按类型名解析实例，必要时委托给父作用域
    fn resolve(&self, type_name: &str) -> Result<Arc<Instance>>;

    /// 将标识符解析为类型描述
    fn type_of(&self, identifier: &str) -> Option<Arc<TypeMeta>>;
}

/// 工厂函数类型
pub type Factory = Arc<dyn Fn(&Injector) -> Result<Target> + Send + Sync>;

struct Definition {
    type_meta: Arc<TypeMeta>,
    factory: Factory,
    scope: Scope,
}

/// 注入器 - Container 的默认实现
///
/// 支持父子作用域、单例缓存、循环依赖检测以及构造流程钩子。
pub struct Injector {
    name: String,
    parent: Option<Arc<Injector>>,
    this: Weak<Injector>,

    /// 类型定义存储
    definitions: RwLock<HashMap<String, Arc<Definition>>>,

    /// 注册顺序，用于向晚加入的处理器补发注册回调
    registration_order: RwLock<Vec<String>>,

    /// 单例实例缓存
    singletons: RwLock<HashMap<String, Arc<Instance>>>,

    /// 构造流程钩子
    processors: RwLock<Vec<Arc<dyn InstancePostProcessor>>>,

    /// 循环依赖检测 - 跟踪正在创建的类型
    creating: Mutex<Vec<String>>,
}

impl Injector {
    /// 创建根注入器
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_parent(name.into(), None)
    }

    /// 创建子作用域
    ///
    /// 子作用域可以解析父作用域中的类型，父作用域的处理器同样作用于子作用域。
    pub fn child(self: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        Self::with_parent(name.into(), Some(Arc::clone(self)))
    }

    fn with_parent(name: String, parent: Option<Arc<Injector>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            parent,
            this: this.clone(),
            definitions: RwLock::new(HashMap::new()),
            registration_order: RwLock::new(Vec::new()),
            singletons: RwLock::new(HashMap::new()),
            processors: RwLock::new(Vec::new()),
            creating: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Injector>> {
        self.parent.as_ref()
    }

    /// 以 trait object 形式返回自身
    pub fn as_container(&self) -> Result<Arc<dyn Container>> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| IocError::ScopeClosed(self.name.clone()))?;
        Ok(this as Arc<dyn Container>)
    }

    /// 注册单例类型
    pub fn register<T, F>(&self, type_meta: Arc<TypeMeta>, factory: F) -> Result<()>
    where
        T: Any + Send + Sync,
        F: Fn(&Injector) -> Result<T> + Send + Sync + 'static,
    {
        self.register_with_scope(type_meta, Scope::Singleton, factory)
    }

    /// 注册原型类型
    pub fn register_prototype<T, F>(&self, type_meta: Arc<TypeMeta>, factory: F) -> Result<()>
    where
        T: Any + Send + Sync,
        F: Fn(&Injector) -> Result<T> + Send + Sync + 'static,
    {
        self.register_with_scope(type_meta, Scope::Prototype, factory)
    }

    /// 注册一个已经构造好的对象（单例）
    pub fn register_value<T: Any + Send + Sync>(&self, type_meta: Arc<TypeMeta>, value: T) -> Result<()> {
        let target: Target = Arc::new(value);
        self.register_factory(
            type_meta,
            Scope::Singleton,
            Arc::new(move |_: &Injector| -> Result<Target> { Ok(Arc::clone(&target)) }),
        )
    }

    pub fn register_with_scope<T, F>(&self, type_meta: Arc<TypeMeta>, scope: Scope, factory: F) -> Result<()>
    where
        T: Any + Send + Sync,
        F: Fn(&Injector) -> Result<T> + Send + Sync + 'static,
    {
        self.register_factory(
            type_meta,
            scope,
            Arc::new(move |injector: &Injector| -> Result<Target> {
                factory(injector).map(|value| Arc::new(value) as Target)
            }),
        )
    }

    /// 使用未类型化的工厂注册
    pub fn register_factory(&self, type_meta: Arc<TypeMeta>, scope: Scope, factory: Factory) -> Result<()> {
        let name = type_meta.name().to_string();
        {
            let mut definitions = self.definitions.write();
            if definitions.contains_key(&name) {
                return Err(IocError::DuplicateType(name).into());
            }
            definitions.insert(
                name.clone(),
                Arc::new(Definition {
                    type_meta: Arc::clone(&type_meta),
                    factory,
                    scope,
                }),
            );
            self.registration_order.write().push(name.clone());
        }

        tracing::debug!("Registered type '{}' ({:?}) in scope '{}'", name, scope, self.name);

        let container = self.as_container()?;
        for processor in self.processors() {
            processor
                .on_register(&type_meta, &container)
                .with_context(|| format!("Processor '{}' rejected type '{}'", processor.name(), name))?;
        }
        Ok(())
    }

    /// 添加构造流程钩子
    ///
    /// 已注册的类型会按注册顺序补发 `on_register`。
    pub fn add_post_processor(&self, processor: Arc<dyn InstancePostProcessor>) -> Result<()> {
        {
            let mut processors = self.processors.write();
            processors.push(Arc::clone(&processor));
            processors.sort_by_key(|p| p.order());
        }
        tracing::debug!(
            "Added post processor '{}' (order {}) to scope '{}'",
            processor.name(),
            processor.order(),
            self.name
        );

        let container = self.as_container()?;
        for type_meta in self.registered_types() {
            processor.on_register(&type_meta, &container)?;
        }
        Ok(())
    }

    /// 当前作用域生效的处理器（包含父作用域的），按 order 排序
    fn processors(&self) -> Vec<Arc<dyn InstancePostProcessor>> {
        let mut processors = self
            .parent
            .as_ref()
            .map(|parent| parent.processors())
            .unwrap_or_default();
        processors.extend(self.processors.read().iter().cloned());
        processors.sort_by_key(|p| p.order());
        processors
    }

    /// 按注册顺序返回本作用域的类型描述
    pub fn registered_types(&self) -> Vec<Arc<TypeMeta>> {
        let definitions = self.definitions.read();
        self.registration_order
            .read()
            .iter()
            .filter_map(|name| definitions.get(name).map(|d| Arc::clone(&d.type_meta)))
            .collect()
    }

    /// 解析实例并转换为具体类型
    pub fn get<T: Any + Send + Sync>(&self, type_name: &str) -> Result<Arc<T>> {
        let instance = self.resolve_instance(type_name)?;
        instance.downcast::<T>().ok_or_else(|| {
            IocError::TargetMismatch {
                expected: std::any::type_name::<T>(),
            }
            .into()
        })
    }

    /// 按类型名解析实例
    pub fn resolve_instance(&self, type_name: &str) -> Result<Arc<Instance>> {
        tracing::trace!("Requesting instance of '{}' from scope '{}'", type_name, self.name);

        let definition = self.definitions.read().get(type_name).cloned();
        let Some(definition) = definition else {
            if let Some(parent) = &self.parent {
                return parent.resolve_instance(type_name);
            }
            tracing::debug!("Type '{}' not found in scope '{}'", type_name, self.name);
            return Err(IocError::TypeNotRegistered {
                type_name: type_name.to_string(),
                scope: self.name.clone(),
            }
            .into());
        };

        if definition.scope == Scope::Singleton {
            if let Some(instance) = self.singletons.read().get(type_name) {
                tracing::trace!("Returning cached instance of singleton '{}'", type_name);
                return Ok(Arc::clone(instance));
            }
        }

        let _guard = CreationGuard::enter(&self.creating, type_name)?;
        let instance = self.create(type_name, &definition)?;

        if definition.scope == Scope::Singleton {
            let mut singletons = self.singletons.write();
            let cached = singletons
                .entry(type_name.to_string())
                .or_insert_with(|| Arc::clone(&instance));
            tracing::debug!("Singleton '{}' created and cached in scope '{}'", type_name, self.name);
            return Ok(Arc::clone(cached));
        }
        Ok(instance)
    }

    fn create(&self, type_name: &str, definition: &Definition) -> Result<Arc<Instance>> {
        let container = self.as_container()?;
        let processors = self.processors();

        for processor in &processors {
            processor.post_process_before_construction(&definition.type_meta, &container)?;
        }

        let target = (definition.factory)(self).with_context(|| format!("Failed to construct '{}'", type_name))?;
        let instance = Arc::new(Instance::new(target, Arc::clone(&definition.type_meta)));

        for processor in &processors {
            processor.post_process_after_construction(&instance, &container)?;
        }
        Ok(instance)
    }

    /// 从 inventory 加载所有组件
    pub fn load_components(&self) -> Result<usize> {
        let mut loaded = 0;
        for registration in get_all_component_registrations() {
            tracing::debug!("  ├─ Loading component: {}", registration.name);
            (registration.registrar)(self)
                .with_context(|| format!("Failed to load component '{}'", registration.name))?;
            loaded += 1;
        }
        tracing::info!("Loaded {} component(s) into scope '{}'", loaded, self.name);
        Ok(loaded)
    }
}

impl Container for Injector {
    fn scope_name(&self) -> &str {
        &self.name
    }

    fn owns(&self, type_name: &str) -> bool {
        self.definitions.read().contains_key(type_name)
    }

    fn resolve(&self, type_name: &str) -> Result<Arc<Instance>> {
        self.resolve_instance(type_name)
    }

    fn type_of(&self, identifier: &str) -> Option<Arc<TypeMeta>> {
        let own = self
            .definitions
            .read()
            .get(identifier)
            .map(|d| Arc::clone(&d.type_meta));
        own.or_else(|| self.parent.as_ref().and_then(|parent| parent.type_of(identifier)))
    }
}

/// 使用 RAII 模式确保在任何情况下都会清理创建标记
struct CreationGuard<'a> {
    creating: &'a Mutex<Vec<String>>,
    name: String,
}

impl<'a> CreationGuard<'a> {
    fn enter(creating: &'a Mutex<Vec<String>>, name: &str) -> Result<Self> {
        let mut chain = creating.lock();
        if chain.iter().any(|n| n == name) {
            let path = format!("{} -> {}", chain.join(" -> "), name);
            tracing::error!("Circular dependency detected while creating '{}': {}", name, path);
            return Err(IocError::CircularDependency(path).into());
        }
        chain.push(name.to_string());
        Ok(Self {
            creating,
            name: name.to_string(),
        })
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        let mut chain = self.creating.lock();
        if let Some(pos) = chain.iter().rposition(|n| *n == self.name) {
            chain.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistration;
    use crate::invoke::{Output, Value};
    use serde_json::json;

    struct Repository {
        prefix: String,
    }

    struct Service {
        repository: Arc<Repository>,
    }

    fn repository_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<Repository>("Repository").build()
    }

    fn service_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<Service>("Service")
            .method("find", &["id"], |this: &Service, args| {
                let id = args.first().and_then(Value::as_i64).unwrap_or_default();
                Ok(Output::value(format!("{}-{}", this.repository.prefix, id)))
            })
            .ctor_params(&["repository"])
            .build()
    }

    fn injector() -> Arc<Injector> {
        let injector = Injector::new("root");
        injector
            .register(repository_type(), |_| {
                Ok(Repository {
                    prefix: "user".to_string(),
                })
            })
            .unwrap();
        injector
            .register(service_type(), |injector| {
                Ok(Service {
                    repository: injector.get::<Repository>("Repository")?,
                })
            })
            .unwrap();
        injector
    }

    #[test]
    fn test_resolves_nested_dependencies() {
        let injector = injector();
        let service = injector.resolve("Service").unwrap();
        let output = service.invoke("find", vec![json!(7)]).unwrap();
        assert_eq!(output.into_sync(), Some(json!("user-7")));
    }

    #[test]
    fn test_singleton_is_cached_and_prototype_is_not() {
        let injector = injector();
        let first = injector.resolve("Service").unwrap();
        let second = injector.resolve("Service").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        struct Request;
        injector
            .register_prototype(TypeMeta::builder::<Request>("Request").build(), |_| Ok(Request))
            .unwrap();
        let first = injector.resolve("Request").unwrap();
        let second = injector.resolve("Request").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_child_scope_delegates_to_parent() {
        let root = injector();
        let child = root.child("request");
        assert!(child.resolve("Service").is_ok());
        assert!(!child.owns("Service"));
        assert!(root.owns("Service"));
        assert_eq!(child.type_of("Repository").unwrap().name(), "Repository");
        assert!(child.type_of("Unknown").is_none());
    }

    #[test]
    fn test_unknown_type_and_duplicates() {
        let injector = injector();
        let err = injector.resolve("Missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IocError>(),
            Some(IocError::TypeNotRegistered { .. })
        ));

        let err = injector
            .register(repository_type(), |_| {
                Ok(Repository {
                    prefix: String::new(),
                })
            })
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<IocError>(), Some(IocError::DuplicateType(_))));
    }

    #[test]
    fn test_circular_dependency_detected() {
        struct Left;
        struct Right;
        let injector = Injector::new("root");
        injector
            .register(TypeMeta::builder::<Left>("Left").build(), |injector| {
                injector.resolve_instance("Right")?;
                Ok(Left)
            })
            .unwrap();
        injector
            .register(TypeMeta::builder::<Right>("Right").build(), |injector| {
                injector.resolve_instance("Left")?;
                Ok(Right)
            })
            .unwrap();

        let err = injector.resolve("Left").unwrap_err();
        let circular = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<IocError>())
            .unwrap();
        assert!(matches!(circular, IocError::CircularDependency(path) if path == "Left -> Right -> Left"));
    }

    struct Recorder {
        name: &'static str,
        order: i32,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl InstancePostProcessor for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn on_register(&self, type_meta: &Arc<TypeMeta>, scope: &Arc<dyn Container>) -> Result<()> {
            self.events.lock().push(format!(
                "{}:register:{}@{}",
                self.name,
                type_meta.name(),
                scope.scope_name()
            ));
            Ok(())
        }

        fn post_process_before_construction(
            &self,
            type_meta: &Arc<TypeMeta>,
            _scope: &Arc<dyn Container>,
        ) -> Result<()> {
            self.events.lock().push(format!("{}:before:{}", self.name, type_meta.name()));
            Ok(())
        }

        fn post_process_after_construction(
            &self,
            instance: &Arc<Instance>,
            _scope: &Arc<dyn Container>,
        ) -> Result<()> {
            self.events
                .lock()
                .push(format!("{}:after:{}", self.name, instance.type_meta().name()));
            Ok(())
        }
    }

    #[test]
    fn test_post_processors_run_in_order_and_replay_registrations() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let injector = Injector::new("root");
        injector
            .register(repository_type(), |_| {
                Ok(Repository {
                    prefix: String::new(),
                })
            })
            .unwrap();

        injector
            .add_post_processor(Arc::new(Recorder {
                name: "late",
                order: 10,
                events: Arc::clone(&events),
            }))
            .unwrap();
        injector
            .add_post_processor(Arc::new(Recorder {
                name: "early",
                order: -10,
                events: Arc::clone(&events),
            }))
            .unwrap();

        injector.resolve("Repository").unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                "late:register:Repository@root",
                "early:register:Repository@root",
                "early:before:Repository",
                "late:before:Repository",
                "early:after:Repository",
                "late:after:Repository",
            ]
        );
    }

    struct Clock;

    fn register_clock(injector: &Injector) -> Result<()> {
        injector.register_value(TypeMeta::builder::<Clock>("Clock").build(), Clock)
    }

    inventory::submit! {
        ComponentRegistration::new("Clock", register_clock)
    }

    #[test]
    fn test_load_components_from_inventory() {
        let injector = Injector::new("root");
        let loaded = injector.load_components().unwrap();
        assert!(loaded >= 1);
        assert!(injector.get::<Clock>("Clock").is_ok());
    }
}
